//! Live schema metadata.
//!
//! Table existence and column metadata, read through the statement executor so
//! metadata queries get the same connect-if-needed and retry behaviour as any
//! other statement.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Table names are compared case-insensitively.

use crate::db::executor::StatementExecutor;
use crate::error::{DbError, DbResult};
use crate::models::query::{value_as_i64, value_as_string};
use crate::models::{DatabaseType, LiveColumn, QueryParam, SqlType};
use tracing::debug;

mod queries {
    pub mod postgres {
        pub const TABLE_EXISTS: &str = r#"
        SELECT table_name::text AS name
        FROM information_schema.tables
        WHERE table_schema = current_schema()
        AND lower(table_name) = lower($1)
        "#;

        pub const COLUMNS: &str = r#"
        SELECT
            column_name::text AS name,
            data_type::text AS type_name,
            character_maximum_length::bigint AS size
        FROM information_schema.columns
        WHERE table_schema = current_schema()
        AND lower(table_name) = lower($1)
        ORDER BY ordinal_position
        "#;
    }

    pub mod mysql {
        pub const TABLE_EXISTS: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8) AS name
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        AND LOWER(TABLE_NAME) = LOWER(?)
        "#;

        pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS name,
            CONVERT(COLUMN_TYPE USING utf8) AS type_name,
            CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS size
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE()
        AND LOWER(TABLE_NAME) = LOWER(?)
        ORDER BY ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const TABLE_EXISTS: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
        AND lower(name) = lower(?)
        "#;

        pub const COLUMNS: &str = "SELECT name, type AS type_name FROM pragma_table_info(?)";
    }
}

fn dialect(exec: &StatementExecutor) -> DbResult<DatabaseType> {
    exec.connection().database_type().ok_or_else(|| {
        DbError::invalid_input(format!(
            "Unsupported connection URL: {}",
            exec.connection().masked_url()
        ))
    })
}

/// Whether `table` exists in the connection's current schema.
pub async fn table_exists(exec: &StatementExecutor, table: &str) -> DbResult<bool> {
    let sql = match dialect(exec)? {
        DatabaseType::PostgreSQL => queries::postgres::TABLE_EXISTS,
        DatabaseType::MySQL => queries::mysql::TABLE_EXISTS,
        DatabaseType::SQLite => queries::sqlite::TABLE_EXISTS,
    };
    let rows = exec
        .query_with(sql, &[QueryParam::from(table)])
        .await?
        .into_row_set();
    debug!(table = %table, exists = !rows.is_empty(), "Checked table existence");
    Ok(!rows.is_empty())
}

/// Live columns of `table`, in ordinal order. Empty when the table does not exist.
pub async fn columns(exec: &StatementExecutor, table: &str) -> DbResult<Vec<LiveColumn>> {
    let sql = match dialect(exec)? {
        DatabaseType::PostgreSQL => queries::postgres::COLUMNS,
        DatabaseType::MySQL => queries::mysql::COLUMNS,
        DatabaseType::SQLite => queries::sqlite::COLUMNS,
    };
    let rows = exec
        .query_with(sql, &[QueryParam::from(table)])
        .await?
        .into_row_set();

    let mut columns = Vec::with_capacity(rows.len());
    for idx in 0..rows.len() {
        let Some(name) = rows.value(idx, "name").and_then(value_as_string) else {
            continue;
        };
        let type_name = rows
            .value(idx, "type_name")
            .and_then(value_as_string)
            .unwrap_or_default();
        let size = rows
            .value(idx, "size")
            .and_then(value_as_i64)
            .and_then(|s| u32::try_from(s).ok())
            .or_else(|| SqlType::parse_size(&type_name));
        columns.push(LiveColumn {
            name,
            type_name,
            size,
        });
    }
    Ok(columns)
}

/// Whether `table` has a column named `column` (case-insensitive).
pub async fn column_exists(exec: &StatementExecutor, table: &str, column: &str) -> DbResult<bool> {
    Ok(columns(exec, table)
        .await?
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(column)))
}
