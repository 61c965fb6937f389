//! Target descriptors
//!
//! How to find one control without holding on to it. Descriptors come from
//! recordings and card rules, so their wire format follows the recorder's
//! flat `{"type": ..., "buttonText": ...}` objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dom::Selector;

/// Attribute the game puts on every branch block
pub const BRANCH_ID_ATTRIBUTE: &str = "data-branch-id";

/// How to find one control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTarget", into = "RawTarget")]
pub enum TargetDescriptor {
    /// A control with the given label inside a scoped container
    ByContainerAndLabel { container: ContainerHint, label: String },
    /// An element with an identifier that survives re-renders
    ByStableId { key: StableKey, label: String },
    /// Structural selector, used only when nothing stronger exists
    BySelectorFallback { selector: Selector, label: String },
}

/// Scope of a [`TargetDescriptor::ByContainerAndLabel`] search
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerHint {
    /// Block titled by a heading containing this text
    Titled(String),
    /// Every element matching the selector
    Marker(Selector),
    /// The result screen's exit area
    ExitRegion,
}

/// Identifier of a [`TargetDescriptor::ByStableId`] target
#[derive(Debug, Clone, PartialEq)]
pub enum StableKey {
    /// The element's `id`
    ElementId(String),
    /// Any attribute, e.g. `data-branch-id`
    Attribute { name: String, value: String },
}

impl TargetDescriptor {
    /// Label used for matching and logging
    pub fn label(&self) -> &str {
        match self {
            TargetDescriptor::ByContainerAndLabel { label, .. }
            | TargetDescriptor::ByStableId { label, .. }
            | TargetDescriptor::BySelectorFallback { label, .. } => label,
        }
    }

    /// An exit control on the result screen
    pub fn exit(label: impl Into<String>) -> Self {
        TargetDescriptor::ByContainerAndLabel {
            container: ContainerHint::ExitRegion,
            label: label.into(),
        }
    }

    /// A labelled control inside the block titled `title`
    pub fn titled(title: impl Into<String>, label: impl Into<String>) -> Self {
        TargetDescriptor::ByContainerAndLabel {
            container: ContainerHint::Titled(title.into()),
            label: label.into(),
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetDescriptor::ByContainerAndLabel { container, label } => match container {
                ContainerHint::Titled(title) => write!(f, "'{label}' under '{title}'"),
                ContainerHint::Marker(sel) => write!(f, "'{label}' in {sel}"),
                ContainerHint::ExitRegion => write!(f, "exit '{label}'"),
            },
            TargetDescriptor::ByStableId { key, label } => match key {
                StableKey::ElementId(id) => write!(f, "'{label}' (#{id})"),
                StableKey::Attribute { name, value } => write!(f, "'{label}' ([{name}={value}])"),
            },
            TargetDescriptor::BySelectorFallback { selector, label } => {
                write!(f, "'{label}' ({selector})")
            }
        }
    }
}

/// Flat wire form of a descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTarget {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    button_text: Option<String>,
}

/// Descriptor wire-format problems
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TargetError {
    #[error("unknown target type {0:?}")]
    UnknownType(String),
    #[error("target type {kind:?} requires field {field:?}")]
    MissingField { kind: String, field: &'static str },
    #[error("invalid selector: {0}")]
    Selector(#[from] crate::dom::SelectorError),
}

impl TryFrom<RawTarget> for TargetDescriptor {
    type Error = TargetError;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        let kind = raw.kind.clone();
        let missing = |field: &'static str| TargetError::MissingField {
            kind: kind.clone(),
            field,
        };

        match raw.kind.as_str() {
            "titled_block_button" | "by_container_and_label" => {
                let label = raw.button_text.ok_or_else(|| missing("buttonText"))?;
                let container = match (raw.title_hint, raw.container) {
                    (Some(title), _) => ContainerHint::Titled(title),
                    (None, Some(css)) => ContainerHint::Marker(Selector::parse(&css)?),
                    (None, None) => return Err(missing("titleHint")),
                };
                Ok(TargetDescriptor::ByContainerAndLabel { container, label })
            }
            "storylet_exit_button" => Ok(TargetDescriptor::exit(
                raw.button_text.ok_or_else(|| missing("buttonText"))?,
            )),
            "branch_button" => Ok(TargetDescriptor::ByStableId {
                key: StableKey::Attribute {
                    name: BRANCH_ID_ATTRIBUTE.to_string(),
                    value: raw.branch_id.ok_or_else(|| missing("branchId"))?,
                },
                label: raw.button_text.unwrap_or_default(),
            }),
            "id_button" | "by_stable_id" => {
                let id = raw.id.ok_or_else(|| missing("id"))?;
                let key = match raw.attribute {
                    Some(name) => StableKey::Attribute { name, value: id },
                    None => StableKey::ElementId(id),
                };
                Ok(TargetDescriptor::ByStableId {
                    key,
                    label: raw.button_text.unwrap_or_default(),
                })
            }
            "selector_button" | "by_selector_fallback" => {
                let css = raw.selector.ok_or_else(|| missing("selector"))?;
                Ok(TargetDescriptor::BySelectorFallback {
                    selector: Selector::parse(&css)?,
                    label: raw.button_text.unwrap_or_default(),
                })
            }
            _ => Err(TargetError::UnknownType(kind)),
        }
    }
}

impl From<TargetDescriptor> for RawTarget {
    fn from(target: TargetDescriptor) -> Self {
        match target {
            TargetDescriptor::ByContainerAndLabel { container, label } => {
                let mut raw = RawTarget {
                    button_text: Some(label),
                    ..Default::default()
                };
                match container {
                    ContainerHint::Titled(title) => {
                        raw.kind = "titled_block_button".to_string();
                        raw.title_hint = Some(title);
                    }
                    ContainerHint::Marker(sel) => {
                        raw.kind = "by_container_and_label".to_string();
                        raw.container = Some(sel.into());
                    }
                    ContainerHint::ExitRegion => {
                        raw.kind = "storylet_exit_button".to_string();
                    }
                }
                raw
            }
            TargetDescriptor::ByStableId { key, label } => match key {
                StableKey::Attribute { name, value } if name == BRANCH_ID_ATTRIBUTE => RawTarget {
                    kind: "branch_button".to_string(),
                    branch_id: Some(value),
                    button_text: Some(label),
                    ..Default::default()
                },
                StableKey::Attribute { name, value } => RawTarget {
                    kind: "id_button".to_string(),
                    id: Some(value),
                    attribute: Some(name),
                    button_text: Some(label),
                    ..Default::default()
                },
                StableKey::ElementId(id) => RawTarget {
                    kind: "id_button".to_string(),
                    id: Some(id),
                    button_text: Some(label),
                    ..Default::default()
                },
            },
            TargetDescriptor::BySelectorFallback { selector, label } => RawTarget {
                kind: "selector_button".to_string(),
                selector: Some(selector.into()),
                button_text: Some(label),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_wire_types() {
        let titled: TargetDescriptor = serde_json::from_str(
            r#"{"type":"titled_block_button","titleHint":"Go to market","buttonText":"Go"}"#,
        )
        .unwrap();
        assert_eq!(titled, TargetDescriptor::titled("Go to market", "Go"));

        let branch: TargetDescriptor =
            serde_json::from_str(r#"{"type":"branch_button","branchId":"204","buttonText":"Go"}"#)
                .unwrap();
        assert!(matches!(
            branch,
            TargetDescriptor::ByStableId { key: StableKey::Attribute { ref name, ref value }, .. }
                if name == BRANCH_ID_ATTRIBUTE && value == "204"
        ));

        let exit: TargetDescriptor =
            serde_json::from_str(r#"{"type":"storylet_exit_button","buttonText":"Onwards"}"#)
                .unwrap();
        assert_eq!(exit, TargetDescriptor::exit("Onwards"));
    }

    #[test]
    fn test_wire_form_preserved() {
        let json = r#"{"type":"selector_button","selector":"button.deck","buttonText":"Draw"}"#;
        let target: TargetDescriptor = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value, serde_json::from_str::<serde_json::Value>(json).unwrap());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = serde_json::from_str::<TargetDescriptor>(r#"{"type":"titled_block_button","titleHint":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("buttonText"));

        let err = serde_json::from_str::<TargetDescriptor>(r#"{"type":"teleport","buttonText":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }
}
