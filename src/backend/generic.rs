//! SQL capability implemented on top of the statement executor.
//!
//! Works for every supported database; dialect differences are rendered by
//! [`dialect`](crate::backend::dialect) from the connection's URL scheme.

use crate::backend::SqlCapability;
use crate::backend::dialect;
use crate::db::{Connection, Cursor, PreparedStatement, StatementExecutor, metadata};
use crate::error::{DbError, DbResult};
use crate::models::query::{value_as_f64, value_as_i64, value_as_string};
use crate::models::{DatabaseType, LiveColumn, QueryParam, UpdateOutcome};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GenericSql {
    exec: StatementExecutor,
}

impl GenericSql {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self {
            exec: StatementExecutor::new(conn),
        }
    }

    pub fn executor(&self) -> &StatementExecutor {
        &self.exec
    }

    fn dialect(&self) -> DbResult<DatabaseType> {
        self.exec.connection().database_type().ok_or_else(|| {
            DbError::invalid_input(format!(
                "Unsupported connection URL: {}",
                self.exec.connection().masked_url()
            ))
        })
    }

    /// First column of a selection, converted cell by cell; NULLs are skipped.
    async fn select_first_column<T>(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
        convert: fn(&JsonValue) -> Option<T>,
    ) -> DbResult<Vec<T>> {
        let sql = dialect::select_sql(distinct, column, tables, condition);
        let cursor = self.exec.query(&sql).await?;
        Ok(cursor
            .filter_map(|row| row.first().and_then(convert))
            .collect())
    }
}

#[async_trait]
impl SqlCapability for GenericSql {
    fn connection(&self) -> &Arc<Connection> {
        self.exec.connection()
    }

    async fn execute(&self, sql: &str) -> DbResult<bool> {
        self.exec.execute(sql).await
    }

    async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Cursor> {
        self.exec.query_with(sql, params).await
    }

    async fn select(
        &self,
        columns: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Cursor> {
        self.exec
            .query(&dialect::select_sql(false, columns, tables, condition))
            .await
    }

    async fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Cursor> {
        self.exec
            .query(&dialect::select_sql(true, columns, tables, condition))
            .await
    }

    async fn prepare(&self, sql: &str, return_keys: bool) -> DbResult<PreparedStatement> {
        self.exec.prepare(sql, return_keys).await
    }

    async fn update(
        &self,
        set_clause: &str,
        table: &str,
        condition: Option<&str>,
    ) -> DbResult<u64> {
        self.exec.update(set_clause, table, condition).await
    }

    async fn insert(&self, sql: &str, params: &[QueryParam]) -> DbResult<UpdateOutcome> {
        self.exec.execute_generated_keys(sql, params).await
    }

    async fn truncate(&self, table: &str) -> DbResult<()> {
        let sql = dialect::truncate_sql(self.dialect()?, table);
        self.exec.execute(&sql).await?;
        info!(table = %table, "Truncated table");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> DbResult<()> {
        self.exec.execute(&format!("DROP TABLE {}", table)).await?;
        info!(table = %table, "Dropped table");
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        metadata::table_exists(&self.exec, table).await
    }

    async fn column_exists(&self, table: &str, column: &str) -> DbResult<bool> {
        metadata::column_exists(&self.exec, table, column).await
    }

    async fn columns(&self, table: &str) -> DbResult<Vec<LiveColumn>> {
        metadata::columns(&self.exec, table).await
    }

    async fn select_strings(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<String>> {
        self.select_first_column(distinct, column, tables, condition, value_as_string)
            .await
    }

    async fn select_ints(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i32>> {
        self.select_first_column(distinct, column, tables, condition, |v| {
            value_as_i64(v).and_then(|n| i32::try_from(n).ok())
        })
        .await
    }

    async fn select_longs(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i64>> {
        self.select_first_column(distinct, column, tables, condition, value_as_i64)
            .await
    }

    async fn select_doubles(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<f64>> {
        self.select_first_column(distinct, column, tables, condition, value_as_f64)
            .await
    }
}
