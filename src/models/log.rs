//! Structured log records and their search conditions.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Status of a freshly recorded entry.
pub const STATUS_NEW: &str = "New";

/// Format used to persist the generation timestamp.
pub const GENERATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Database id, `None` until stored.
    pub id: Option<i64>,
    pub generation: NaiveDateTime,
    pub source: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub status: String,
    /// Free-form payload, stored as JSON text.
    pub message: JsonValue,
}

impl LogEntry {
    /// A new, unsaved entry generated now.
    pub fn new(source: impl Into<String>, entry_type: impl Into<String>, message: JsonValue) -> Self {
        // Storage keeps whole seconds only.
        let now = Local::now().naive_local();
        Self {
            id: None,
            generation: now.with_nanosecond(0).unwrap_or(now),
            source: source.into(),
            entry_type: entry_type.into(),
            status: STATUS_NEW.to_string(),
            message,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_generation(mut self, generation: NaiveDateTime) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation_text(&self) -> String {
        self.generation.format(GENERATION_FORMAT).to_string()
    }
}

/// Parse a persisted generation timestamp.
pub fn parse_generation(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), GENERATION_FORMAT).ok()
}

/// Conditions for searching log entries. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConditions {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
    /// Inclusive lower bound.
    pub generation_min: Option<NaiveDateTime>,
    /// Inclusive upper bound.
    pub generation_max: Option<NaiveDateTime>,
    /// Newest first unless set.
    #[serde(default)]
    pub ascending: bool,
    pub limit: Option<u32>,
}

impl LogConditions {
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn entry_type(mut self, entry_type: impl Into<String>) -> Self {
        self.types.push(entry_type.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.statuses.push(status.into());
        self
    }

    pub fn between(mut self, min: Option<NaiveDateTime>, max: Option<NaiveDateTime>) -> Self {
        self.generation_min = min;
        self.generation_max = max;
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_entry_defaults() {
        let entry = LogEntry::new("flow", "error", json!({"msg": "boom"}));
        assert_eq!(entry.status, STATUS_NEW);
        assert!(entry.id.is_none());
        assert_eq!(parse_generation(&entry.generation_text()), Some(entry.generation));
    }

    #[test]
    fn test_parse_generation() {
        let ts = parse_generation("2024-03-01 12:30:45").unwrap();
        assert_eq!(ts.format(GENERATION_FORMAT).to_string(), "2024-03-01 12:30:45");
        assert!(parse_generation("yesterday").is_none());
    }

    #[test]
    fn test_conditions_builder() {
        let cond = LogConditions::default()
            .source("a")
            .source("b")
            .status(STATUS_NEW)
            .limit(5);
        assert_eq!(cond.sources, vec!["a", "b"]);
        assert_eq!(cond.statuses, vec![STATUS_NEW]);
        assert_eq!(cond.limit, Some(5));
        assert!(!cond.ascending);
    }
}
