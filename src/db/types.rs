//! Row decoding.
//!
//! Result rows are materialized as ordered JSON values so that callers never
//! see a driver-specific row type.
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's reported type into a logical category
//! 2. Database-specific decoders extract the value for that category
//!
//! Values that cannot be decoded are reported as `null`.

use crate::models::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Text,
}

/// Classify a reported column type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first as "numeric" would otherwise fall through to text
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity decodes as a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite stores dates as text
    if db != DatabaseType::SQLite
        && (lower.starts_with("timestamp")
            || lower == "datetime"
            || lower == "date"
            || lower.starts_with("time"))
    {
        return TypeCategory::Temporal;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// DECIMAL/NUMERIC value in its exact textual database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary cells are reported base64-encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Non-finite floats have no JSON number form and are kept as text.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn datetime_value(v: NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn display_value<T: ToString>(v: T) -> JsonValue {
    JsonValue::String(v.to_string())
}

// =============================================================================
// Row Materialization
// =============================================================================

/// Converts a driver row into ordered JSON cells.
pub trait RowValues {
    fn column_names(&self) -> Vec<String>;
    fn to_values(&self) -> Vec<JsonValue>;
}

macro_rules! impl_row_values {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowValues for $row {
            fn column_names(&self) -> Vec<String> {
                self.columns().iter().map(|c| c.name().to_string()).collect()
            }

            fn to_values(&self) -> Vec<JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        $decoder(self, idx, category).unwrap_or(JsonValue::Null)
                    })
                    .collect()
            }
        }
    };
}

impl_row_values!(MySqlRow, DatabaseType::MySQL, decode_mysql);
impl_row_values!(PgRow, DatabaseType::PostgreSQL, decode_postgres);
impl_row_values!(SqliteRow, DatabaseType::SQLite, decode_sqlite);

// =============================================================================
// Cell Decoding
// =============================================================================

/// A cell decoded as `T`; `None` for NULL or a type the driver refuses.
fn cell<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

/// The first of the listed Rust types the driver accepts for the cell.
macro_rules! first_of {
    ($row:expr, $idx:expr; $($ty:ty => $map:expr),+ $(,)?) => {
        None$(.or_else(|| cell::<_, $ty>($row, $idx).map($map)))+
    };
}

fn decode_decimal<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    RawDecimal: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(v) => v.map(|d| JsonValue::String(d.0)),
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
            None
        }
    }
}

fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => first_of!(row, idx;
            i64 => JsonValue::from,
            u64 => JsonValue::from,
            i32 => JsonValue::from,
            i16 => JsonValue::from,
            i8 => JsonValue::from,
        ),
        TypeCategory::Boolean => cell::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => first_of!(row, idx;
            f64 => float_value,
            f32 => |v| float_value(v as f64),
        ),
        TypeCategory::Temporal => first_of!(row, idx;
            NaiveDateTime => datetime_value,
            DateTime<Utc> => |v| datetime_value(v.naive_utc()),
            NaiveDate => display_value,
            NaiveTime => display_value,
        ),
        TypeCategory::Binary => cell::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        TypeCategory::Json => cell::<_, JsonValue>(row, idx),
        TypeCategory::Text => cell::<_, String>(row, idx).map(JsonValue::String),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => first_of!(row, idx;
            i64 => JsonValue::from,
            i32 => JsonValue::from,
            i16 => JsonValue::from,
        ),
        TypeCategory::Boolean => cell::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => first_of!(row, idx;
            f64 => float_value,
            f32 => |v| float_value(v as f64),
        ),
        TypeCategory::Temporal => first_of!(row, idx;
            NaiveDateTime => datetime_value,
            DateTime<Utc> => |v| JsonValue::String(v.to_rfc3339()),
            NaiveDate => display_value,
            NaiveTime => display_value,
        ),
        TypeCategory::Binary => cell::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        TypeCategory::Json => cell::<_, JsonValue>(row, idx),
        TypeCategory::Text => cell::<_, String>(row, idx).map(JsonValue::String),
    }
}

/// SQLite stores by affinity, so only the storage classes are distinguished.
fn decode_sqlite(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Integer => cell::<_, i64>(row, idx).map(JsonValue::from),
        TypeCategory::Boolean => cell::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float | TypeCategory::Decimal => cell::<_, f64>(row, idx).map(float_value),
        TypeCategory::Binary => cell::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        _ => first_of!(row, idx;
            String => JsonValue::String,
            i64 => JsonValue::from,
            f64 => float_value,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT4", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::SQLite),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_categorize_type_text_fallback() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }
}
