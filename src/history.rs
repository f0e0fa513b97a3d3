//! Persisted connection history.
//!
//! A JSON file holding the previously used connection parameters, most recent
//! first and without duplicates, plus one designated default. Passwords are
//! stored obfuscated, never in clear text.

use crate::error::{DbError, DbResult};
use crate::models::ConnectionParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<ConnectionParameters>,
    #[serde(default)]
    entries: Vec<ConnectionParameters>,
}

impl ConnectionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the history file; a missing file yields an empty history.
    pub fn load(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No connection history yet");
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::internal(format!("Cannot read history '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            DbError::invalid_input(format!("Malformed history '{}': {}", path.display(), e))
        })
    }

    /// Write the history file, creating missing parent directories.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::internal(format!("Cannot create '{}': {}", parent.display(), e))
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| DbError::internal(format!("Cannot serialize history: {}", e)))?;
        std::fs::write(path, text).map_err(|e| {
            DbError::internal(format!("Cannot write history '{}': {}", path.display(), e))
        })?;
        info!(path = %path.display(), entries = self.entries.len(), "Saved connection history");
        Ok(())
    }

    /// Move `params` to the front, dropping an earlier identical entry.
    pub fn add(&mut self, params: ConnectionParameters) {
        self.entries.retain(|p| p != &params);
        self.entries.insert(0, params);
    }

    pub fn make_default(&mut self, params: ConnectionParameters) {
        self.default = Some(params);
    }

    pub fn default_connection(&self) -> Option<&ConnectionParameters> {
        self.default.as_ref()
    }

    /// History entries, most recent first.
    pub fn entries(&self) -> &[ConnectionParameters] {
        &self.entries
    }

    /// The default followed by the history, without duplicates.
    pub fn connections(&self) -> Vec<ConnectionParameters> {
        let mut result: Vec<ConnectionParameters> = Vec::new();
        for params in self.default.iter().chain(self.entries.iter()) {
            if !result.contains(params) {
                result.push(params.clone());
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Default location of the history file.
pub fn default_history_path() -> PathBuf {
    PathBuf::from("connections.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionSettings, Password};

    fn params(url: &str) -> ConnectionParameters {
        ConnectionParameters::from_settings(&ConnectionSettings::new(
            url,
            "user",
            Password::new("pw"),
        ))
    }

    #[test]
    fn test_add_is_most_recent_first() {
        let mut history = ConnectionHistory::new();
        history.add(params("sqlite:a.db"));
        history.add(params("sqlite:b.db"));
        history.add(params("sqlite:a.db"));
        let urls: Vec<&str> = history.entries().iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["sqlite:a.db", "sqlite:b.db"]);
    }

    #[test]
    fn test_connections_puts_default_first() {
        let mut history = ConnectionHistory::new();
        history.add(params("sqlite:a.db"));
        history.add(params("sqlite:b.db"));
        history.make_default(params("sqlite:a.db"));
        let urls: Vec<String> = history.connections().into_iter().map(|p| p.url).collect();
        assert_eq!(urls, vec!["sqlite:a.db", "sqlite:b.db"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let mut history = ConnectionHistory::new();
        history.add(params("sqlite:a.db"));
        history.make_default(params("sqlite:a.db"));
        history.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("\"pw\""));
        assert_eq!(ConnectionHistory::load(&path).unwrap(), history);
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        assert!(ConnectionHistory::load(&path).unwrap().is_empty());
        std::fs::write(&path, "not json").unwrap();
        assert!(ConnectionHistory::load(&path).is_err());
    }
}
