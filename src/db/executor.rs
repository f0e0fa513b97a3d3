//! Statement execution engine.
//!
//! This module runs statements against the physical handle of a
//! [`Connection`] with support for:
//! - Connect-if-needed (fails with `NotConnected` when no handle can be opened)
//! - A single retry on transient driver errors
//! - Scoped statement handles that are released exactly once
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific statement execution
//! - `postgres`: PostgreSQL-specific statement execution
//! - `sqlite`: SQLite-specific statement execution
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::connection::Connection;
use crate::db::driver::DbHandle;
use crate::db::types::RowValues;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, RowSet, UpdateOutcome};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Leading keywords of statements that always produce a result set.
const QUERY_KEYWORDS: [&str; 7] = [
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "VALUES", "DESCRIBE",
];

/// Run a statement once more if the first attempt failed transiently.
///
/// Only the failed attempt is repeated; a statement is never run twice after a
/// success.
macro_rules! retry_once {
    ($sql:expr, $call:expr) => {
        match $call {
            Err(e) if e.is_transient() => {
                warn!(sql = %$sql, error = %e, "Transient driver error, retrying once");
                $call
            }
            other => other,
        }
    };
}

/// Marks one open statement on its connection; closes it on drop.
#[derive(Debug)]
pub struct StatementGuard {
    open: Arc<AtomicUsize>,
}

impl StatementGuard {
    pub(crate) fn new(open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { open }
    }
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        trace!("Statement closed");
    }
}

/// Materialized result of a query.
///
/// Rows are handed out in order; dropping (or closing) the cursor releases its
/// statement.
#[derive(Debug)]
pub struct Cursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<JsonValue>>,
    _statement: StatementGuard,
}

impl Cursor {
    fn new(rows: RowSet, statement: StatementGuard) -> Self {
        Self {
            columns: rows.columns,
            rows: rows.rows.into_iter(),
            _statement: statement,
        }
    }

    /// Column labels in select order (empty when no row was returned).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Collect the remaining rows and close the cursor.
    pub fn into_row_set(self) -> RowSet {
        let Cursor { columns, rows, .. } = self;
        RowSet {
            columns,
            rows: rows.collect(),
        }
    }

    /// Explicitly close the cursor and its statement.
    pub fn close(self) {}
}

impl Iterator for Cursor {
    type Item = Vec<JsonValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// Executes statements on one connection.
#[derive(Debug, Clone)]
pub struct StatementExecutor {
    conn: Arc<Connection>,
}

impl StatementExecutor {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Run any statement; `true` when it produced a result set.
    pub async fn execute(&self, sql: &str) -> DbResult<bool> {
        let start = Instant::now();
        let _statement = self.conn.statement_guard();
        let mut slot = self.conn.acquire().await?;
        let handle = slot
            .as_mut()
            .ok_or_else(|| DbError::not_connected(self.conn.masked_url()))?;

        let result = retry_once!(sql, execute_handle(handle, sql).await);
        let produced = self.conn.settle(&mut slot, result)?;
        debug!(
            sql = %sql,
            result_set = produced,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed statement"
        );
        Ok(produced || starts_with_query_keyword(sql))
    }

    /// Run a query and return its rows.
    pub async fn query(&self, sql: &str) -> DbResult<Cursor> {
        self.query_with(sql, &[]).await
    }

    /// Run a parameterized query and return its rows.
    pub async fn query_with(&self, sql: &str, params: &[QueryParam]) -> DbResult<Cursor> {
        let start = Instant::now();
        let statement = self.conn.statement_guard();
        let mut slot = self.conn.acquire().await?;
        let handle = slot
            .as_mut()
            .ok_or_else(|| DbError::not_connected(self.conn.masked_url()))?;

        let result = retry_once!(sql, fetch_handle(handle, sql, params).await);
        let rows = self.conn.settle(&mut slot, result)?;
        debug!(
            sql = %sql,
            params = params.len(),
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed query"
        );
        Ok(Cursor::new(rows, statement))
    }

    /// `UPDATE table SET set_clause [WHERE where_clause]`, returning affected rows.
    pub async fn update(
        &self,
        set_clause: &str,
        table: &str,
        where_clause: Option<&str>,
    ) -> DbResult<u64> {
        let mut sql = format!("UPDATE {} SET {}", table, set_clause);
        if let Some(condition) = where_clause.map(str::trim).filter(|w| !w.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        Ok(self.execute_update(&sql, &[]).await?.rows_affected)
    }

    /// Run a write statement with parameters.
    pub async fn execute_update(&self, sql: &str, params: &[QueryParam]) -> DbResult<UpdateOutcome> {
        self.write(sql, params, false).await
    }

    /// Run an INSERT and report the generated key where the database provides one.
    pub async fn execute_generated_keys(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<UpdateOutcome> {
        self.write(sql, params, true).await
    }

    async fn write(
        &self,
        sql: &str,
        params: &[QueryParam],
        return_keys: bool,
    ) -> DbResult<UpdateOutcome> {
        let start = Instant::now();
        let _statement = self.conn.statement_guard();
        let mut slot = self.conn.acquire().await?;
        let handle = slot
            .as_mut()
            .ok_or_else(|| DbError::not_connected(self.conn.masked_url()))?;

        let result = retry_once!(sql, write_handle(handle, sql, params, return_keys).await);
        let outcome = self.conn.settle(&mut slot, result)?;
        debug!(
            sql = %sql,
            params = params.len(),
            rows_affected = outcome.rows_affected,
            generated_key = ?outcome.generated_key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed update"
        );
        Ok(outcome)
    }

    /// Prepare a statement for repeated parameterized execution.
    pub async fn prepare(&self, sql: &str, return_keys: bool) -> DbResult<PreparedStatement> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_input("SQL statement cannot be empty"));
        }
        // Fail early when there is no physical connection
        drop(self.conn.acquire().await?);
        Ok(PreparedStatement {
            executor: self.clone(),
            sql: sql.to_string(),
            return_keys,
            params: Vec::new(),
            _statement: self.conn.statement_guard(),
        })
    }
}

/// A statement with bound parameters, executable many times.
#[derive(Debug)]
pub struct PreparedStatement {
    executor: StatementExecutor,
    sql: String,
    return_keys: bool,
    params: Vec<QueryParam>,
    _statement: StatementGuard,
}

impl PreparedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Append the next positional parameter.
    pub fn bind(&mut self, param: impl Into<QueryParam>) -> &mut Self {
        self.params.push(param.into());
        self
    }

    pub fn set_params(&mut self, params: Vec<QueryParam>) {
        self.params = params;
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    pub async fn query(&self) -> DbResult<Cursor> {
        self.executor.query_with(&self.sql, &self.params).await
    }

    pub async fn execute_update(&self) -> DbResult<UpdateOutcome> {
        self.executor
            .write(&self.sql, &self.params, self.return_keys)
            .await
    }

    /// Explicitly close the statement.
    pub fn close(self) {}
}

fn starts_with_query_keyword(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    QUERY_KEYWORDS
        .iter()
        .any(|k| first.eq_ignore_ascii_case(k))
}

/// Whether a statement already carries a `RETURNING` clause.
fn has_returning_clause(sql: &str) -> bool {
    sql.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case("returning"))
}

// =============================================================================
// Handle-level dispatch
// =============================================================================

/// Run a raw statement (no parameters), returning the affected row count.
pub(crate) async fn run_raw(handle: &mut DbHandle, sql: &str) -> DbResult<u64> {
    let outcome = write_handle(handle, sql, &[], false).await?;
    Ok(outcome.rows_affected)
}

/// Run a query on a handle.
pub(crate) async fn fetch_handle(
    handle: &mut DbHandle,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<RowSet> {
    crate::impl_db_dispatch!(handle, {
        MySql(c) => mysql::fetch_rows(c, sql, params).await,
        Postgres(c) => postgres::fetch_rows(c, sql, params).await,
        SQLite(c) => sqlite::fetch_rows(c, sql, params).await,
    })
}

async fn write_handle(
    handle: &mut DbHandle,
    sql: &str,
    params: &[QueryParam],
    return_keys: bool,
) -> DbResult<UpdateOutcome> {
    crate::impl_db_dispatch!(handle, {
        MySql(c) => mysql::execute_write(c, sql, params, return_keys).await,
        Postgres(c) => postgres::execute_write(c, sql, params, return_keys).await,
        SQLite(c) => sqlite::execute_write(c, sql, params, return_keys).await,
    })
}

async fn execute_handle(handle: &mut DbHandle, sql: &str) -> DbResult<bool> {
    crate::impl_db_dispatch!(handle, {
        MySql(c) => mysql::execute_probe(c, sql).await,
        Postgres(c) => postgres::execute_probe(c, sql).await,
        SQLite(c) => sqlite::execute_probe(c, sql).await,
    })
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn to_row_set<R: RowValues>(rows: Vec<R>) -> RowSet {
    let columns = rows.first().map(|r| r.column_names()).unwrap_or_default();
    RowSet {
        columns,
        rows: rows.iter().map(|r| r.to_values()).collect(),
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql;
    use futures_util::TryStreamExt;
    use sqlx::mysql::MySqlConnection;
    use sqlx::{Either, Executor};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<RowSet> {
        // Without params, use raw SQL to avoid prepared statement issues
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            bind_mysql(sqlx::query(sql), params).fetch_all(&mut *conn).await?
        };
        Ok(to_row_set(rows))
    }

    pub async fn execute_write(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        return_keys: bool,
    ) -> DbResult<UpdateOutcome> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            bind_mysql(sqlx::query(sql), params).execute(&mut *conn).await?
        };
        let generated_key = (return_keys && result.last_insert_id() > 0)
            .then(|| result.last_insert_id() as i64);
        Ok(UpdateOutcome {
            rows_affected: result.rows_affected(),
            generated_key,
        })
    }

    pub async fn execute_probe(conn: &mut MySqlConnection, sql: &str) -> DbResult<bool> {
        let mut produced = false;
        let mut stream = conn.fetch_many(sql);
        while let Some(item) = stream.try_next().await? {
            if let Either::Right(_) = item {
                produced = true;
            }
        }
        Ok(produced)
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres;
    use crate::models::query::value_as_i64;
    use futures_util::TryStreamExt;
    use sqlx::postgres::PgConnection;
    use sqlx::{Either, Executor};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<RowSet> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            bind_postgres(sqlx::query(sql), params).fetch_all(&mut *conn).await?
        };
        Ok(to_row_set(rows))
    }

    pub async fn execute_write(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        return_keys: bool,
    ) -> DbResult<UpdateOutcome> {
        // PostgreSQL reports generated keys through RETURNING
        if return_keys {
            let sql = if has_returning_clause(sql) {
                sql.to_string()
            } else {
                format!("{} RETURNING *", sql.trim_end().trim_end_matches(';'))
            };
            let rows = fetch_rows(conn, &sql, params).await?;
            let generated_key = rows
                .rows
                .first()
                .and_then(|r| r.first())
                .and_then(value_as_i64);
            return Ok(UpdateOutcome {
                rows_affected: rows.len() as u64,
                generated_key,
            });
        }

        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            bind_postgres(sqlx::query(sql), params).execute(&mut *conn).await?
        };
        Ok(UpdateOutcome {
            rows_affected: result.rows_affected(),
            generated_key: None,
        })
    }

    pub async fn execute_probe(conn: &mut PgConnection, sql: &str) -> DbResult<bool> {
        let mut produced = false;
        let mut stream = conn.fetch_many(sql);
        while let Some(item) = stream.try_next().await? {
            if let Either::Right(_) = item {
                produced = true;
            }
        }
        Ok(produced)
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite;
    use futures_util::TryStreamExt;
    use sqlx::sqlite::SqliteConnection;
    use sqlx::{Either, Executor};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<RowSet> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            bind_sqlite(sqlx::query(sql), params).fetch_all(&mut *conn).await?
        };
        Ok(to_row_set(rows))
    }

    pub async fn execute_write(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        return_keys: bool,
    ) -> DbResult<UpdateOutcome> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            bind_sqlite(sqlx::query(sql), params).execute(&mut *conn).await?
        };
        let generated_key = (return_keys && result.rows_affected() > 0)
            .then(|| result.last_insert_rowid());
        Ok(UpdateOutcome {
            rows_affected: result.rows_affected(),
            generated_key,
        })
    }

    pub async fn execute_probe(conn: &mut SqliteConnection, sql: &str) -> DbResult<bool> {
        let mut produced = false;
        let mut stream = conn.fetch_many(sql);
        while let Some(item) = stream.try_next().await? {
            if let Either::Right(_) = item {
                produced = true;
            }
        }
        Ok(produced)
    }
}
