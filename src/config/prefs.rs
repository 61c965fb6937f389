//! Persisted operator preferences
//!
//! A tiny key-value store that survives between sessions. The only value
//! the automation persists is the failure policy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Key under which the failure policy is stored
pub const FAILURE_POLICY_KEY: &str = "failureAction";

/// What to do when the classifier reports a failed challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run
    #[default]
    Stop,
    /// Dismiss the failure screen and replay the step
    Retry,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Stop => "stop",
            FailurePolicy::Retry => "retry",
        }
    }

    /// Read the stored policy, falling back to `Stop`
    pub fn load(store: &dyn PreferenceStore) -> Self {
        match store.get(FAILURE_POLICY_KEY) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("Ignoring unknown failure policy {:?}", raw);
                FailurePolicy::default()
            }),
            None => FailurePolicy::default(),
        }
    }

    /// Persist this policy
    pub fn save(self, store: &dyn PreferenceStore) -> Result<(), PrefsError> {
        store.set(FAILURE_POLICY_KEY, self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = PrefsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(FailurePolicy::Stop),
            "retry" => Ok(FailurePolicy::Retry),
            other => Err(PrefsError::UnknownValue(other.to_string())),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host key-value storage
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError>;
}

/// In-memory store, for tests and hosts without persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let mut values = self.values.lock().map_err(|_| PrefsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences kept as a flat JSON object on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// `<config dir>/storylet-pilot/prefs.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("storylet-pilot").join("prefs.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let mut values = self.values.lock().map_err(|_| PrefsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Failed to access preference file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Preference file is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown preference value: {0}")]
    UnknownValue(String),
    #[error("Preference store lock poisoned")]
    Poisoned,
}
