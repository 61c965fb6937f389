//! Rule files
//!
//! Operators load one of two shapes of JSON: an object mapping card event
//! ids to card rules (the cycle config), or an array of recorded action
//! records. Both are validated up front so a bad file never reaches a run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigError;
use crate::automation::ActionRecord;
use crate::locate::TargetDescriptor;

/// What to do with a matching card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CardAction {
    Play,
    Discard,
}

impl TryFrom<String> for CardAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "play" => Ok(CardAction::Play),
            "discard" => Ok(CardAction::Discard),
            _ => Err(format!("unknown card action {value:?}")),
        }
    }
}

impl From<CardAction> for String {
    fn from(action: CardAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for CardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardAction::Play => f.write_str("play"),
            CardAction::Discard => f.write_str("discard"),
        }
    }
}

/// One card rule of the cycle config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRule {
    pub action: CardAction,
    /// Outfit to wear before choosing the branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfit: Option<String>,
    /// Branch to choose once the card is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<TargetDescriptor>,
    /// Result-screen control to leave through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_button_text: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Card rules keyed by event id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleConfig {
    rules: BTreeMap<String, CardRule>,
}

impl CycleConfig {
    pub fn rule(&self, event_id: &str) -> Option<&CardRule> {
        self.rules.get(event_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CardRule)> {
        self.rules.iter().map(|(id, rule)| (id.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn insert(&mut self, event_id: impl Into<String>, rule: CardRule) {
        self.rules.insert(event_id.into(), rule);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (id, rule) in &self.rules {
            if rule.action == CardAction::Play && rule.branch.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "rule for card {id} plays the card but names no branch"
                )));
            }
        }
        Ok(())
    }
}

/// A validated rule file
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedConfig {
    /// Card automator rules
    Cycle(CycleConfig),
    /// Recorded actions to replay in order
    Recording(Vec<ActionRecord>),
}

impl LoadedConfig {
    /// Whether there is nothing to run
    pub fn is_empty(&self) -> bool {
        match self {
            LoadedConfig::Cycle(rules) => rules.is_empty(),
            LoadedConfig::Recording(records) => records.is_empty(),
        }
    }
}

impl fmt::Display for LoadedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadedConfig::Cycle(rules) => write!(f, "{} card rule(s)", rules.len()),
            LoadedConfig::Recording(records) => write!(f, "{} recorded action(s)", records.len()),
        }
    }
}

/// Parse and validate a rule file's contents
pub fn load_config(text: &str) -> Result<LoadedConfig, ConfigError> {
    let value: Value = serde_json::from_str(text).map_err(ConfigError::malformed)?;

    match value {
        Value::Object(_) => {
            let rules: CycleConfig =
                serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
            rules.validate()?;
            Ok(LoadedConfig::Cycle(rules))
        }
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let Value::Object(fields) = &item else {
                    return Err(ConfigError::Invalid(format!(
                        "recorded action {index} is not an object"
                    )));
                };
                if !fields.contains_key("type") {
                    return Err(ConfigError::Invalid(format!(
                        "recorded action {index} has no type"
                    )));
                }
                if !fields.contains_key("buttonText") && !fields.contains_key("id") {
                    return Err(ConfigError::Invalid(format!(
                        "recorded action {index} has neither buttonText nor id"
                    )));
                }
                let record = serde_json::from_value(item)
                    .map_err(|e| ConfigError::Invalid(format!("recorded action {index}: {e}")))?;
                records.push(record);
            }
            Ok(LoadedConfig::Recording(records))
        }
        _ => Err(ConfigError::Invalid(
            "expected an object of card rules or an array of recorded actions".to_string(),
        )),
    }
}

/// Read and validate a rule file
pub fn load_config_file(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config = load_config(&text)?;
    log::info!("Loaded {} from {}", config, path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_empty_cycle_config() {
        let config = load_config("{}").unwrap();
        assert_eq!(config, LoadedConfig::Cycle(CycleConfig::default()));
        assert!(config.is_empty());
    }

    #[test]
    fn test_array_of_non_objects_rejected() {
        assert!(matches!(load_config("[1,2,3]"), Err(ConfigError::Invalid(_))));
        assert!(matches!(load_config("42"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_syntax_error_is_invalid() {
        let err = load_config("{\"1\": {\"action\": \"play\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_card_rules() {
        let config = load_config(
            r#"{
                "12345": {
                    "action": "PLAY",
                    "outfit": "Shadowy",
                    "branch": {"type": "titled_block_button", "titleHint": "A street urchin", "buttonText": "Go"},
                    "exitButtonText": "Onwards",
                    "description": "Urchin card"
                },
                "999": {"action": "Discard", "description": "junk"}
            }"#,
        )
        .unwrap();

        let LoadedConfig::Cycle(rules) = config else {
            panic!("expected cycle config");
        };
        assert_eq!(rules.len(), 2);
        let urchin = rules.rule("12345").unwrap();
        assert_eq!(urchin.action, CardAction::Play);
        assert_eq!(urchin.outfit.as_deref(), Some("Shadowy"));
        assert_eq!(
            urchin.branch,
            Some(TargetDescriptor::titled("A street urchin", "Go"))
        );
        assert_eq!(rules.rule("999").unwrap().action, CardAction::Discard);
    }

    #[test]
    fn test_play_without_branch_rejected() {
        let err = load_config(r#"{"1": {"action": "play", "description": "x"}}"#).unwrap_err();
        assert!(err.to_string().contains("names no branch"));

        let err = load_config(r#"{"1": {"action": "hoard"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_recording() {
        let config = load_config(
            r#"[
                {"type": "branch_button", "branchId": "204", "buttonText": "Go", "titleHint": "Haul"},
                {"type": "id_button", "id": "sell"},
                {"type": "storylet_exit_button", "buttonText": "Onwards"}
            ]"#,
        )
        .unwrap();
        let LoadedConfig::Recording(records) = config else {
            panic!("expected recording");
        };
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].target, TargetDescriptor::exit("Onwards"));
    }

    #[test]
    fn test_recording_entry_without_label_or_id_rejected() {
        let err = load_config(r#"[{"type": "selector_button", "selector": "button.deck"}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("neither buttonText nor id"));

        let err = load_config(r#"[{"buttonText": "Go"}]"#).unwrap_err();
        assert!(err.to_string().contains("has no type"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(load_config_file(&path).unwrap().is_empty());

        assert!(matches!(
            load_config_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
