//! Integration tests for backend dispatch through facades.
//!
//! Tests verify that:
//! - A facade is built once per connection and reused
//! - A disconnect drops the facade so the next lookup resolves a fresh backend
//! - Reconfiguring the backend rebinds existing facades
//! - Log storage works end to end through the context
//! - Log facades share one managed log table per connection

use db_layer::backend::{LogCapability, LogTable, SqlCapability};
use db_layer::config::Config;
use db_layer::context::DbContext;
use db_layer::db::SqlxDriver;
use db_layer::error::DbError;
use db_layer::models::{ConnectionSettings, LogConditions, LogEntry, Password};
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn context(backend: &str) -> DbContext {
    let config = Config {
        backend: Some(backend.to_string()),
        ..Config::default()
    };
    DbContext::with_driver(&config, Arc::new(SqlxDriver)).unwrap()
}

fn temp_settings() -> ConnectionSettings {
    let path = NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap();
    ConnectionSettings::new(format!("sqlite:{}", path.display()), "", Password::default())
}

#[test]
fn test_unknown_backend_is_fatal() {
    let config = Config {
        backend: Some("oracle".to_string()),
        ..Config::default()
    };
    let err = DbContext::new(&config).unwrap_err();
    assert!(matches!(err, DbError::BackendUnresolved { .. }));
}

#[tokio::test]
async fn test_facade_invalidation() {
    let ctx = context("sqlite");
    let conn = ctx.connection("app", temp_settings()).await;

    let first = ctx.sql(&conn).unwrap();
    assert!(Arc::ptr_eq(&first, &ctx.sql(&conn).unwrap()));
    assert_eq!(ctx.dispatcher().resolutions(), 1);

    first.execute("CREATE TABLE t (a INTEGER)").await.unwrap();
    assert!(conn.is_connected());
    conn.disconnect().await.unwrap();

    let second = ctx.sql(&conn).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(ctx.dispatcher().resolutions(), 2);
    assert!(second.table_exists("t").await.unwrap());
}

#[tokio::test]
async fn test_reconfigure_rebinds_facade() {
    let ctx = context("sqlite");
    let conn = ctx.connection("app", temp_settings()).await;
    let facade = ctx.sql(&conn).unwrap();
    facade.execute("CREATE TABLE t (a INTEGER)").await.unwrap();

    ctx.reconfigure(Some("generic")).unwrap();
    assert!(facade.table_exists("t").await.unwrap());
    assert_eq!(ctx.dispatcher().name(), "generic");
    assert_eq!(ctx.dispatcher().resolutions(), 2);

    // the backend no longer accepts this connection
    ctx.reconfigure(Some("mysql")).unwrap();
    assert!(!ctx.dispatcher().is_supported(&conn));
    assert!(facade.table_exists("t").await.is_err());
}

#[tokio::test]
async fn test_log_storage_through_context() {
    let ctx = context("generic");
    let conn = ctx.connection("log", temp_settings()).await;
    let log = ctx.log(&conn).unwrap();
    assert!(log.init().await.unwrap());
    assert!(log.init().await.unwrap());

    let first = log
        .add(&LogEntry::new("reader", "warning", json!({"file": "a.png"})))
        .await
        .unwrap();
    let second = log
        .add(&LogEntry::new("writer", "error", json!({"file": "b.png"})).with_status("Failed"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let failed = log
        .search(&LogConditions::default().status("Failed"))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, Some(second));
    assert_eq!(failed[0].message, json!({"file": "b.png"}));

    assert!(log.remove(first).await.unwrap());
    assert!(!log.exists(first).await.unwrap());

    let sql = ctx.sql(&conn).unwrap();
    assert_eq!(
        sql.select_longs(false, "id", "log", None).await.unwrap(),
        vec![second]
    );
    ctx.shutdown().await;
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_log_table_is_registered_once() {
    let ctx = context("generic");
    let conn = ctx.connection("log", temp_settings()).await;
    let log = ctx.log(&conn).unwrap();
    assert!(log.init().await.unwrap());
    let again = ctx.log(&conn).unwrap();
    assert!(Arc::ptr_eq(&log, &again));

    let table = ctx.tables().get::<LogTable>(&conn.identity()).unwrap();
    assert!(Arc::ptr_eq(log.table(), &table));

    conn.disconnect().await.unwrap();
    assert!(ctx.tables().get::<LogTable>(&conn.identity()).is_none());
    let fresh = ctx.log(&conn).unwrap();
    assert!(!Arc::ptr_eq(fresh.table(), &table));
    assert!(fresh.init().await.unwrap());
    ctx.shutdown().await;
}

/// Requires a running PostgreSQL server.
/// Set TEST_POSTGRES_URL environment variable to run this test.
#[tokio::test]
async fn test_postgres_log_storage() {
    let pg_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let ctx = context("postgresql");
    let conn = ctx
        .connection("log", ConnectionSettings::new(pg_url, "", Password::default()))
        .await;
    let log = ctx.log(&conn).unwrap();
    log.init().await.unwrap();
    let id = log
        .add(&LogEntry::new("pg-test", "info", json!("hello")))
        .await
        .unwrap();
    assert!(log.exists(id).await.unwrap());
    assert!(log.remove(id).await.unwrap());
    ctx.shutdown().await;
}

/// Requires a running MySQL server.
/// Set TEST_MYSQL_URL environment variable to run this test.
#[tokio::test]
async fn test_mysql_log_storage() {
    let mysql_url = match std::env::var("TEST_MYSQL_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_URL not set");
            return;
        }
    };
    let ctx = context("mysql");
    let conn = ctx
        .connection("log", ConnectionSettings::new(mysql_url, "", Password::default()))
        .await;
    let log = ctx.log(&conn).unwrap();
    log.init().await.unwrap();
    let id = log
        .add(&LogEntry::new("mysql-test", "info", json!("hello")))
        .await
        .unwrap();
    assert!(log.exists(id).await.unwrap());
    assert!(log.remove(id).await.unwrap());
    ctx.shutdown().await;
}
