//! Structured log storage in a schema-managed `log` table.

use crate::backend::{LogCapability, SqlCapability};
use crate::error::{DbError, DbResult};
use crate::models::log::{GENERATION_FORMAT, parse_generation};
use crate::models::query::{value_as_i64, value_as_string};
use crate::models::{
    ColumnType, DatabaseType, IndexSpec, LogConditions, LogEntry, QueryParam, SqlType, TableSpec,
};
use crate::table::SchemaManager;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};

pub const LOG_TABLE: &str = "log";

const COLUMNS: &str = "id, generation, source, type, status, message";

/// Declared shape of the log table.
pub fn log_table_spec() -> TableSpec {
    TableSpec::new(LOG_TABLE)
        .column("id", ColumnType::primary_key(SqlType::Integer))
        .column("generation", ColumnType::sized(SqlType::Varchar, 32))
        .column("source", ColumnType::sized(SqlType::Varchar, 255))
        .column("type", ColumnType::sized(SqlType::Varchar, 64))
        .column("status", ColumnType::sized(SqlType::Varchar, 32))
        .column("message", ColumnType::new(SqlType::Text))
        .index(IndexSpec::on("source"))
        .index(IndexSpec::on("type"))
        .index(IndexSpec::on("status"))
}

/// The managed `log` table of one connection.
///
/// Cached in the table registry so every log backend built for the connection
/// shares one schema manager.
#[derive(Debug)]
pub struct LogTable {
    schema: SchemaManager,
}

impl LogTable {
    pub fn new(sql: Arc<dyn SqlCapability>) -> Self {
        Self {
            schema: SchemaManager::new(sql, log_table_spec()).add_missing_columns(true),
        }
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub async fn init(&self) -> DbResult<bool> {
        self.schema.init().await
    }
}

/// Log storage on top of any SQL capability.
pub struct SqlLogStorage {
    sql: Arc<dyn SqlCapability>,
    table: Arc<LogTable>,
}

impl std::fmt::Debug for SqlLogStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLogStorage")
            .field("connection", self.sql.connection())
            .finish_non_exhaustive()
    }
}

impl SqlLogStorage {
    pub fn new(sql: Arc<dyn SqlCapability>, table: Arc<LogTable>) -> Self {
        Self { sql, table }
    }

    fn dialect(&self) -> DbResult<DatabaseType> {
        self.sql.connection().database_type().ok_or_else(|| {
            DbError::invalid_input(format!(
                "Unsupported connection URL: {}",
                self.sql.connection().masked_url()
            ))
        })
    }

    /// Render `SELECT ... FROM log WHERE ...` with positional parameters.
    fn search_sql(&self, conditions: &LogConditions) -> DbResult<(String, Vec<QueryParam>)> {
        let mut marks = Placeholders::new(self.dialect()?);
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for (column, values) in [
            ("source", &conditions.sources),
            ("type", &conditions.types),
            ("status", &conditions.statuses),
        ] {
            if values.is_empty() {
                continue;
            }
            let list: Vec<String> = values.iter().map(|_| marks.next()).collect();
            clauses.push(format!("{} IN ({})", column, list.join(", ")));
            params.extend(values.iter().map(|v| QueryParam::from(v.as_str())));
        }
        if let Some(min) = conditions.generation_min {
            clauses.push(format!("generation >= {}", marks.next()));
            params.push(QueryParam::String(min.format(GENERATION_FORMAT).to_string()));
        }
        if let Some(max) = conditions.generation_max {
            clauses.push(format!("generation <= {}", marks.next()));
            params.push(QueryParam::String(max.format(GENERATION_FORMAT).to_string()));
        }

        let mut sql = format!("SELECT {} FROM {}", COLUMNS, LOG_TABLE);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let order = if conditions.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY generation {}, id {}", order, order));
        if let Some(limit) = conditions.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok((sql, params))
    }

    fn entry_params(entry: &LogEntry) -> DbResult<Vec<QueryParam>> {
        let message = serde_json::to_string(&entry.message)
            .map_err(|e| DbError::invalid_input(format!("Unserializable log message: {}", e)))?;
        Ok(vec![
            QueryParam::String(entry.generation_text()),
            QueryParam::from(entry.source.as_str()),
            QueryParam::from(entry.entry_type.as_str()),
            QueryParam::from(entry.status.as_str()),
            QueryParam::String(message),
        ])
    }
}

/// Positional parameter markers: `$n` on PostgreSQL, `?` elsewhere.
struct Placeholders {
    db: DatabaseType,
    n: usize,
}

impl Placeholders {
    fn new(db: DatabaseType) -> Self {
        Self { db, n: 0 }
    }

    fn next(&mut self) -> String {
        self.n += 1;
        match self.db {
            DatabaseType::PostgreSQL => format!("${}", self.n),
            _ => "?".to_string(),
        }
    }
}

/// Decode one `COLUMNS` row.
fn row_to_entry(row: &[JsonValue]) -> DbResult<LogEntry> {
    let text = |i: usize| row.get(i).and_then(value_as_string).unwrap_or_default();
    let generation_text = text(1);
    let generation = parse_generation(&generation_text).ok_or_else(|| {
        DbError::internal(format!("Invalid log generation '{}'", generation_text))
    })?;
    let raw_message = text(5);
    let message =
        serde_json::from_str(&raw_message).unwrap_or(JsonValue::String(raw_message));

    Ok(LogEntry {
        id: row.first().and_then(value_as_i64),
        generation,
        source: text(2),
        entry_type: text(3),
        status: text(4),
        message,
    })
}

#[async_trait]
impl LogCapability for SqlLogStorage {
    async fn init(&self) -> DbResult<bool> {
        self.table.init().await
    }

    async fn load(&self, id: i64) -> DbResult<Option<LogEntry>> {
        let mut marks = Placeholders::new(self.dialect()?);
        let sql = format!("SELECT {} FROM {} WHERE id = {}", COLUMNS, LOG_TABLE, marks.next());
        let mut cursor = self.sql.query(&sql, &[QueryParam::Int(id)]).await?;
        cursor.next().map(|row| row_to_entry(&row)).transpose()
    }

    async fn search(&self, conditions: &LogConditions) -> DbResult<Vec<LogEntry>> {
        let (sql, params) = self.search_sql(conditions)?;
        let cursor = self.sql.query(&sql, &params).await?;
        let entries = cursor
            .map(|row| row_to_entry(&row))
            .collect::<DbResult<Vec<_>>>()?;
        debug!(found = entries.len(), "Searched log entries");
        Ok(entries)
    }

    async fn exists(&self, id: i64) -> DbResult<bool> {
        let mut marks = Placeholders::new(self.dialect()?);
        let sql = format!("SELECT id FROM {} WHERE id = {}", LOG_TABLE, marks.next());
        let cursor = self.sql.query(&sql, &[QueryParam::Int(id)]).await?;
        Ok(cursor.remaining() > 0)
    }

    async fn add(&self, entry: &LogEntry) -> DbResult<i64> {
        let mut marks = Placeholders::new(self.dialect()?);
        let values: Vec<String> = (0..5).map(|_| marks.next()).collect();
        let sql = format!(
            "INSERT INTO {} (generation, source, type, status, message) VALUES ({})",
            LOG_TABLE,
            values.join(", ")
        );
        let outcome = self.sql.insert(&sql, &Self::entry_params(entry)?).await?;
        let id = outcome
            .generated_key
            .ok_or_else(|| DbError::internal("No id generated for log entry"))?;
        info!(id = id, source = %entry.source, entry_type = %entry.entry_type, "Stored log entry");
        Ok(id)
    }

    async fn update(&self, entry: &LogEntry) -> DbResult<bool> {
        let id = entry
            .id
            .ok_or_else(|| DbError::invalid_input("Log entry has no id"))?;
        let mut marks = Placeholders::new(self.dialect()?);
        let sql = format!(
            "UPDATE {} SET generation = {}, source = {}, type = {}, status = {}, message = {} WHERE id = {}",
            LOG_TABLE,
            marks.next(),
            marks.next(),
            marks.next(),
            marks.next(),
            marks.next(),
            marks.next()
        );
        let mut params = Self::entry_params(entry)?;
        params.push(QueryParam::Int(id));

        let mut statement = self.sql.prepare(&sql, false).await?;
        statement.set_params(params);
        let outcome = statement.execute_update().await?;
        Ok(outcome.rows_affected > 0)
    }

    async fn remove(&self, id: i64) -> DbResult<bool> {
        let mut marks = Placeholders::new(self.dialect()?);
        let sql = format!("DELETE FROM {} WHERE id = {}", LOG_TABLE, marks.next());
        let mut statement = self.sql.prepare(&sql, false).await?;
        statement.bind(id);
        let outcome = statement.execute_update().await?;
        Ok(outcome.rows_affected > 0)
    }
}
