//! Configuration module
//!
//! Automation settings, the rule files an operator loads, and the small set
//! of preferences persisted between sessions.

pub mod prefs;
pub mod rules;
pub mod settings;

pub use prefs::{FailurePolicy, JsonFileStore, MemoryStore, PreferenceStore, PrefsError};
pub use rules::{load_config, load_config_file, CardAction, CardRule, CycleConfig, LoadedConfig};
pub use settings::Settings;

/// Errors raised while loading settings or rule files
///
/// Anything wrong with a file's contents, from a JSON syntax error to a bad
/// selector or a play rule without a branch, is `Invalid`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn malformed(e: serde_json::Error) -> Self {
        ConfigError::Invalid(format!("not valid JSON: {e}"))
    }
}
