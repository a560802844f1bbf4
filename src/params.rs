//! Persisted keyed-value parameters.
//!
//! A flat YAML mapping of field names to values (`sa_ip`, `f_start`, ...),
//! saved on request and reloaded at startup. Two documents are usually kept
//! side by side: a hand-written defaults file and the last-used values.

use crate::error::{AppResult, DaqError};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// In-memory parameter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    values: BTreeMap<String, Value>,
}

impl ParamStore {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`.
    ///
    /// A missing file is reported with a warning and yields `Ok(None)`; it is
    /// not an error. An unreadable or malformed file is.
    pub fn load(path: &Path) -> AppResult<Option<Self>> {
        if !path.exists() {
            warn!("Parameter file {} not found", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let values: BTreeMap<String, Value> = serde_yaml::from_str(&text)
            .map_err(|e| DaqError::Params(format!("{}: {}", path.display(), e)))?;
        info!("Loaded {} parameters from {}", values.len(), path.display());
        Ok(Some(Self { values }))
    }

    /// Write the document to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(&self.values)
            .map_err(|e| DaqError::Params(e.to_string()))?;
        std::fs::write(path, text)?;
        info!("Saved {} parameters to {}", self.values.len(), path.display());
        Ok(())
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Numeric value for `key` (integers are widened).
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// String value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Set `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Copy every entry of `other` over this one.
    pub fn merge(&mut self, other: &ParamStore) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
