//! Query-related data models.
//!
//! This module defines statement parameters and materialized result sets.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A fully materialized result set, columns in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by (case-insensitive) label.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value at `row`/`column`, `None` when out of range.
    pub fn value(&self, row: usize, column: &str) -> Option<&JsonValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Outcome of an update-style statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub rows_affected: u64,
    /// Generated key, when requested and supported by the database.
    pub generated_key: Option<i64>,
}

/// Read a JSON cell as a string (numbers and booleans are rendered).
pub fn value_as_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read a JSON cell as an integer (numeric strings are parsed).
pub fn value_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Read a JSON cell as a float (numeric strings are parsed).
pub fn value_as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_type_name() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert_eq!(QueryParam::from("x").type_name(), "string");
        assert_eq!(QueryParam::from(3_i64).type_name(), "int");
        assert!(QueryParam::Null.is_null());
    }

    #[test]
    fn test_row_set_lookup_is_case_insensitive() {
        let rows = RowSet {
            columns: vec!["ID".to_string(), "name".to_string()],
            rows: vec![vec![json!(1), json!("a")]],
        };
        assert_eq!(rows.value(0, "id"), Some(&json!(1)));
        assert_eq!(rows.value(0, "NAME"), Some(&json!("a")));
        assert_eq!(rows.value(1, "id"), None);
        assert_eq!(rows.value(0, "missing"), None);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(value_as_i64(&json!("42")), Some(42));
        assert_eq!(value_as_i64(&json!(7)), Some(7));
        assert_eq!(value_as_f64(&json!("1.5")), Some(1.5));
        assert_eq!(value_as_string(&json!(3)), Some("3".to_string()));
        assert_eq!(value_as_string(&JsonValue::Null), None);
    }
}
