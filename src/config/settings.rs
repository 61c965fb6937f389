//! Automation settings
//!
//! Timings, retry policy, outcome heuristics and every selector the
//! automation uses. Selectors belong to the game, not to this crate, so they
//! all live here where a settings file can override them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prefs::FailurePolicy;
use super::ConfigError;
use crate::dom::Selector;

/// Parse a selector literal that ships with the crate
fn builtin(css: &str) -> Selector {
    Selector::parse(css).expect("built-in selector is valid")
}

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Poll, transition and trigger timings
    pub timings: TimingSettings,
    /// Retry policy and run budget
    pub automation: AutomationSettings,
    /// Outcome classification heuristics
    pub classifier: ClassifierSettings,
    /// Selectors used by the element locator
    pub profile: LocatorProfile,
    /// Selectors used by the card automator
    pub cards: CardProfile,
    /// Loop-mode branch priorities
    pub branches: BranchProfile,
    /// Selectors for the scripted equip-highest sequence
    pub equip: EquipProfile,
}

impl Settings {
    /// Load settings from a JSON file; absent fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Shorter delays for a responsive connection
    pub fn fast_preset() -> Self {
        Self {
            timings: TimingSettings {
                poll_interval_ms: 150,
                transition_delay_ms: 800,
                transition_jitter_ms: 300,
                recovery_delay_ms: 600,
                recovery_jitter_ms: 300,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Long delays and automatic retries for unattended runs
    pub fn cautious_preset() -> Self {
        Self {
            timings: TimingSettings {
                transition_delay_ms: 2500,
                transition_jitter_ms: 800,
                element_timeout_ms: 30_000,
                settle_timeout_ms: 30_000,
                ..Default::default()
            },
            automation: AutomationSettings {
                on_failure: FailurePolicy::Retry,
                highlight_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "fast" => Some(Self::fast_preset()),
            "cautious" => Some(Self::cautious_preset()),
            _ => None,
        }
    }
}

/// Timing settings, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Interval between locator polls
    pub poll_interval_ms: u64,
    /// How long to wait for a control to appear
    pub element_timeout_ms: u64,
    /// Fixed part of the post-click delay
    pub transition_delay_ms: u64,
    /// Random extra on top of the post-click delay
    pub transition_jitter_ms: u64,
    /// How long a pending outcome may stay pending
    pub settle_timeout_ms: u64,
    /// Fixed part of the delay after dismissing a failure screen
    pub recovery_delay_ms: u64,
    /// Random extra on top of the recovery delay
    pub recovery_jitter_ms: u64,
    /// How long to look for the failure screen's exit control
    pub recovery_timeout_ms: u64,
    /// Pause before replaying a failed step
    pub retry_pause_ms: u64,
    /// Wait for the outfit menu to open
    pub outfit_menu_delay_ms: u64,
    /// Wait for an outfit change to apply
    pub outfit_apply_delay_ms: u64,
    /// How long a busy marker may stay on the page
    pub disappear_timeout_ms: u64,
    /// Quiet period after the last page mutation before re-evaluating
    pub mutation_debounce_ms: u64,
    /// Period of the coarse re-evaluation timer
    pub tick_interval_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            element_timeout_ms: 15_000,
            transition_delay_ms: 1200,
            transition_jitter_ms: 600,
            settle_timeout_ms: 15_000,
            recovery_delay_ms: 1000,
            recovery_jitter_ms: 500,
            recovery_timeout_ms: 3000,
            retry_pause_ms: 500,
            outfit_menu_delay_ms: 300,
            outfit_apply_delay_ms: 1000,
            disappear_timeout_ms: 15_000,
            mutation_debounce_ms: 800,
            tick_interval_ms: 2000,
        }
    }
}

impl TimingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn disappear_timeout(&self) -> Duration {
        Duration::from_millis(self.disappear_timeout_ms)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// General automation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// What to do when a challenge fails
    pub on_failure: FailurePolicy,
    /// Consecutive failures of one step before giving up
    pub max_consecutive_failures: u32,
    /// Loop-mode cycle budget (0 = unlimited)
    pub max_cycles: u32,
    /// Outline controls while they are clicked
    pub highlight_targets: bool,
    /// Re-evaluate after page mutations settle
    pub watch_mutations: bool,
    /// Re-evaluate on a coarse timer
    pub periodic_ticks: bool,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::Stop,
            max_consecutive_failures: 3,
            max_cycles: 0,
            highlight_targets: false,
            watch_mutations: true,
            periodic_ticks: true,
        }
    }
}

/// Outcome classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Region holding the outcome text of the last action
    pub outcome_region: Selector,
    /// Phrase (case-insensitive) that marks a failed challenge
    pub failure_phrase: String,
    /// Elements whose presence means the outcome has rendered
    pub settled_markers: Selector,
    /// Stop once a tracked quality reaches this value
    pub goal_quality: Option<i64>,
    /// One block per changed quality
    pub goal_container: Selector,
    /// Value element inside a goal container; the last one wins
    pub goal_value: Selector,
    /// Treat known unlucky headings as failures
    pub failure_titles_enabled: bool,
    /// Heading checked by the failure-title heuristic
    pub failure_title_selector: Selector,
    /// Lower-case fragments of unlucky headings
    pub failure_titles: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            outcome_region: builtin(".media--quality-updates, .quality-updates"),
            failure_phrase: "failed in a challenge".to_string(),
            settled_markers: builtin(".buttons--storylet-exit-options, .quality-update__body"),
            goal_quality: None,
            goal_container: builtin(".quality-update__body"),
            goal_value: builtin(".progress .progress__current"),
            failure_titles_enabled: false,
            failure_title_selector: builtin(".media--root .storylet-root__heading"),
            failure_titles: ["unconvinced", "a setback!", "frustration", "no luck this time"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Selectors the element locator works with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorProfile {
    /// Headings that title a block of choices
    pub headings: Selector,
    /// Blocks a heading scopes
    pub containers: Selector,
    /// Anything clickable
    pub controls: Selector,
    /// Markup injected by in-page translators
    pub overlays: Selector,
    /// Area holding the exit controls of a result screen
    pub exit_region: Selector,
    /// Labels that dismiss a failure screen, in preference order
    pub recovery_labels: Vec<String>,
    /// Control that opens the outfit menu
    pub outfit_trigger: Selector,
    /// Entries of the open outfit menu
    pub outfit_option: Selector,
}

impl Default for LocatorProfile {
    fn default() -> Self {
        Self {
            headings: builtin("h1, h2, .storylet-root__heading, .storylet__heading, .branch__title"),
            containers: builtin(".storylet, .media--root, .branch, [data-branch-id]"),
            controls: builtin("button, input[type=button], input[type=submit], [role=button]"),
            overlays: builtin(
                "font.immersive-translate-target-wrapper, .immersive-translate-target-wrapper, font.notranslate",
            ),
            exit_region: builtin(".buttons--storylet-exit-options"),
            recovery_labels: ["Onwards", "Continue", "Try again"]
                .into_iter()
                .map(String::from)
                .collect(),
            outfit_trigger: builtin(".outfit-selector [class*=\"-control\"]"),
            outfit_option: builtin("[class*=\"-option\"]"),
        }
    }
}

/// Selectors for the opportunity-card automator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardProfile {
    /// The hand of drawn cards; absent when not on the story tab
    pub hand: Selector,
    /// One drawn card
    pub card: Selector,
    /// Attribute carrying the card's event id
    pub event_attribute: String,
    /// Clickable face of a card
    pub card_face: Selector,
    /// Discard control of a card
    pub discard_button: Selector,
    /// The deck to draw from
    pub deck: Selector,
}

impl Default for CardProfile {
    fn default() -> Self {
        Self {
            hand: builtin(".hand"),
            card: builtin(".hand__card-container[data-event-id]"),
            event_attribute: "data-event-id".to_string(),
            card_face: builtin("[role=button]"),
            discard_button: builtin(".card__discard-button"),
            deck: builtin("button.deck"),
        }
    }
}

/// One ranked branch for loop mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTarget {
    /// Branch title as shown
    pub title: String,
    /// Higher runs first
    pub priority: i32,
}

/// Loop-mode branch search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProfile {
    /// One selectable branch
    pub branch: Selector,
    /// Title element inside a branch
    pub title: Selector,
    /// Button that plays a branch
    pub go_button: Selector,
    /// Caption of the go button
    pub go_label: String,
    /// Caption of the control that leaves the result screen
    pub exit_label: String,
    /// Ranked targets
    pub targets: Vec<BranchTarget>,
}

impl Default for BranchProfile {
    fn default() -> Self {
        Self {
            branch: builtin(".media.branch"),
            title: builtin(".branch__title"),
            go_button: builtin("button.button--go"),
            go_label: "Go".to_string(),
            exit_label: "Onwards".to_string(),
            targets: Vec::new(),
        }
    }
}

/// Selectors for equipping the best items for one quality
///
/// The possessions page offers an item category dropdown and an
/// "Equip Highest" button; slots show a busy class while they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipProfile {
    /// Link that opens the possessions page
    pub possessions_link: Selector,
    /// Dropdown control choosing the item category
    pub category_control: Selector,
    /// Currently selected category inside the dropdown
    pub category_value: Selector,
    /// Entries of the open category dropdown
    pub category_option: Selector,
    /// Button that equips the highest items
    pub equip_button: Selector,
    /// Caption of the equip button
    pub equip_label: String,
    /// Marks a slot whose item is still changing
    pub changing_slot: Selector,
    /// Link back to the story page
    pub story_link: Selector,
}

impl Default for EquipProfile {
    fn default() -> Self {
        Self {
            possessions_link: builtin("a.cursor-pointer[href=\"/possessions\"]"),
            category_control: builtin("div.css-f92gjm-control"),
            category_value: builtin(".css-gj4dr3-singleValue"),
            category_option: builtin("[role=listbox] [role=option]"),
            equip_button: builtin("button.button--primary"),
            equip_label: "Equip Highest".to_string(),
            changing_slot: builtin(".equipment-slot--is-changing"),
            story_link: builtin("a.cursor-pointer[href=\"/\"]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.automation.max_consecutive_failures, 3);
        assert_eq!(settings.automation.on_failure, FailurePolicy::Stop);
        assert_eq!(settings.timings.poll_interval_ms, 300);
        assert!(!settings.classifier.failure_titles_enabled);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "timings": { "transition_delay_ms": 2500 }, "classifier": { "goal_quality": 7 } }"#,
        )
        .unwrap();
        assert_eq!(settings.timings.transition_delay_ms, 2500);
        assert_eq!(settings.timings.poll_interval_ms, 300);
        assert_eq!(settings.classifier.goal_quality, Some(7));
        assert_eq!(settings.classifier.failure_phrase, "failed in a challenge");
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let result: Result<Settings, _> =
            serde_json::from_str(r#"{ "profile": { "controls": "button >" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reports_bad_files_as_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        std::fs::write(&path, "{ \"timings\": ").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "equip": { "changing_slot": ".slot >" } }"#).unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "timings": { "disappear_timeout_ms": 500 } }"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.timings.disappear_timeout(), Duration::from_millis(500));
        assert_eq!(settings.equip.equip_label, "Equip Highest");
    }

    #[test]
    fn test_cautious_preset() {
        let settings = Settings::cautious_preset();
        assert_eq!(settings.automation.on_failure, FailurePolicy::Retry);
        assert!(settings.timings.transition_delay_ms >= 2500);
        assert!(Settings::preset("fast").is_some());
        assert!(Settings::preset("turbo").is_none());
    }
}
