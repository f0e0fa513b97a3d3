//! Backend capability contracts.
//!
//! Callers program against [`SqlCapability`] and [`LogCapability`]; the
//! [`BackendDispatcher`] picks the concrete implementation named in the
//! configuration. Neither surface exposes a driver type.

pub mod dialect;
pub mod dispatcher;
pub mod generic;
pub mod log;

use crate::db::{Connection, Cursor, PreparedStatement};
use crate::error::DbResult;
use crate::models::{LiveColumn, LogConditions, LogEntry, QueryParam, UpdateOutcome};
use async_trait::async_trait;
use std::sync::Arc;

pub use dispatcher::{BackendCatalog, BackendDispatcher, BackendFactory};
pub use generic::GenericSql;
pub use log::{LogTable, SqlLogStorage};

/// Generic SQL access on one connection.
#[async_trait]
pub trait SqlCapability: Send + Sync {
    fn connection(&self) -> &Arc<Connection>;

    /// Run any statement; `true` when it produced a result set.
    async fn execute(&self, sql: &str) -> DbResult<bool>;

    async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Cursor>;

    /// `SELECT columns FROM tables [WHERE ...]`.
    ///
    /// A condition starting with `LIMIT` or `ORDER` is appended without `WHERE`.
    async fn select(&self, columns: &str, tables: &str, condition: Option<&str>)
    -> DbResult<Cursor>;

    async fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Cursor>;

    async fn prepare(&self, sql: &str, return_keys: bool) -> DbResult<PreparedStatement>;

    /// `UPDATE table SET set_clause [WHERE condition]`, returning affected rows.
    async fn update(&self, set_clause: &str, table: &str, condition: Option<&str>)
    -> DbResult<u64>;

    /// Run an INSERT, reporting the generated key where available.
    async fn insert(&self, sql: &str, params: &[QueryParam]) -> DbResult<UpdateOutcome>;

    /// Remove all rows of a table.
    async fn truncate(&self, table: &str) -> DbResult<()>;

    async fn drop_table(&self, table: &str) -> DbResult<()>;

    async fn table_exists(&self, table: &str) -> DbResult<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> DbResult<bool>;

    async fn columns(&self, table: &str) -> DbResult<Vec<LiveColumn>>;

    /// First column of the selection as strings (NULLs skipped).
    async fn select_strings(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<String>>;

    async fn select_ints(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i32>>;

    async fn select_longs(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i64>>;

    async fn select_doubles(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<f64>>;
}

/// Storage of structured log records.
#[async_trait]
pub trait LogCapability: Send + Sync {
    /// Make sure the backing table exists and conforms.
    async fn init(&self) -> DbResult<bool>;

    async fn load(&self, id: i64) -> DbResult<Option<LogEntry>>;

    async fn search(&self, conditions: &LogConditions) -> DbResult<Vec<LogEntry>>;

    async fn exists(&self, id: i64) -> DbResult<bool>;

    /// Store a new entry, returning its id.
    async fn add(&self, entry: &LogEntry) -> DbResult<i64>;

    /// Overwrite a stored entry; `false` when no entry has its id.
    async fn update(&self, entry: &LogEntry) -> DbResult<bool>;

    async fn remove(&self, id: i64) -> DbResult<bool>;
}
