//! Integration tests for connection lifecycle.
//!
//! Tests verify that:
//! - Registries hand out one connection per (URL, user, password)
//! - The failed-attempt ceiling stops further driver calls
//! - Settings cannot change while connected
//! - Changing credentials moves the connection to its new registry key
//! - The reconnect loop gives up on communications faults
//! - Manual commit mode keeps changes in a transaction until commit

use async_trait::async_trait;
use db_layer::db::{Connection, ConnectionList, ConnectionRegistry, DbHandle, Driver, SqlxDriver};
use db_layer::error::{DbError, DbResult};
use db_layer::models::{ConnectionSettings, Password};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::NamedTempFile;

/// Driver that counts open attempts and fails on demand.
#[derive(Default)]
struct CountingDriver {
    opens: AtomicUsize,
    fail: AtomicBool,
    communications: AtomicBool,
}

impl CountingDriver {
    fn failing() -> Arc<Self> {
        let driver = Self::default();
        driver.fail.store(true, Ordering::SeqCst);
        Arc::new(driver)
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for CountingDriver {
    async fn open(&self, settings: &ConnectionSettings) -> DbResult<DbHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.communications.load(Ordering::SeqCst) {
            return Err(DbError::communications("connection refused"));
        }
        if self.fail.load(Ordering::SeqCst) && settings.url.contains("unreachable") {
            return Err(DbError::connection("host unreachable", "check the host"));
        }
        SqlxDriver.open(settings).await
    }
}

fn temp_db() -> String {
    let path = NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap();
    format!("sqlite:{}", path.display())
}

#[test]
fn test_identity_caching() {
    let registry = ConnectionRegistry::new("app", Arc::new(ConnectionList::new()));
    let driver: Arc<dyn Driver> = Arc::new(SqlxDriver);
    let settings = |url: &str, user: &str, pw: &str| {
        ConnectionSettings::new(url, user, Password::new(pw))
    };

    let a = registry.get_or_create(settings("sqlite:a.db", "u", "p"), Arc::clone(&driver));
    let b = registry.get_or_create(settings("sqlite:a.db", "u", "p"), Arc::clone(&driver));
    assert!(Arc::ptr_eq(&a, &b));

    for other in [
        settings("sqlite:b.db", "u", "p"),
        settings("sqlite:a.db", "v", "p"),
        settings("sqlite:a.db", "u", "q"),
    ] {
        let c = registry.get_or_create(other, Arc::clone(&driver));
        assert!(!Arc::ptr_eq(&a, &c));
    }
    assert_eq!(registry.len(), 4);
}

#[test]
fn test_credential_change_follows_registry() {
    let registry = ConnectionRegistry::new("app", Arc::new(ConnectionList::new()));
    let driver: Arc<dyn Driver> = Arc::new(SqlxDriver);
    let settings = |pw: &str| ConnectionSettings::new("sqlite:a.db", "u", Password::new(pw));

    let a = registry.get_or_create(settings("old"), Arc::clone(&driver));
    a.set_password(Password::new("new"));
    assert!(Arc::ptr_eq(
        &a,
        &registry.get_or_create(settings("new"), Arc::clone(&driver))
    ));

    let b = registry.get_or_create(settings("old"), driver);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(a.identity(), b.identity());
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_retry_ceiling_stops_driver_calls() {
    let driver = CountingDriver::failing();
    let conn = Connection::new(
        ConnectionSettings::new("sqlite:unreachable.db", "", Password::default())
            .with_max_connect_attempts(3),
        driver.clone(),
    );

    for _ in 0..3 {
        assert!(conn.connect().await.is_err());
    }
    assert_eq!(driver.opens(), 3);
    assert_eq!(conn.failed_attempts(), 3);

    for _ in 0..5 {
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, DbError::TooManyFailedAttempts { .. }));
    }
    assert_eq!(driver.opens(), 3);
    assert!(conn.last_error().contains("Maximum number of connection attempts"));
}

#[tokio::test]
async fn test_example_scenario() {
    let driver = CountingDriver::failing();
    let conn = Connection::new(
        ConnectionSettings::new("sqlite:unreachable.db", "", Password::new("secret"))
            .with_max_connect_attempts(2),
        driver.clone(),
    );

    assert!(conn.connect().await.is_err());
    assert!(conn.connect().await.is_err());
    assert_eq!(conn.failed_attempts(), 2);

    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, DbError::TooManyFailedAttempts { .. }));
    assert_eq!(driver.opens(), 2);
    assert!(!err.to_string().contains("secret"));
    assert!(!conn.last_error().contains("secret"));

    conn.set_url(temp_db());
    conn.retry_connect().await.unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.failed_attempts(), 0);
    assert_eq!(driver.opens(), 3);
}

#[tokio::test]
async fn test_mutation_guard() {
    let conn = Connection::new(
        ConnectionSettings::new("sqlite::memory:", "user", Password::new("pw")),
        Arc::new(SqlxDriver),
    );
    conn.connect().await.unwrap();
    let identity = conn.identity();

    conn.set_url("sqlite:other.db");
    conn.set_user("other");
    conn.set_password(Password::new("other"));
    conn.set_auto_commit(false);
    conn.set_max_connect_attempts(9);
    conn.set_reconnect_wait_secs(99);
    conn.set_connect_on_startup(true);

    assert_eq!(conn.url(), "sqlite::memory:");
    assert_eq!(conn.user(), "user");
    assert_eq!(conn.identity(), identity);
    assert!(conn.auto_commit());
    assert_eq!(conn.max_connect_attempts(), 1);
    assert_eq!(conn.reconnect_wait_secs(), 10);
    assert!(!conn.connect_on_startup());

    conn.disconnect().await.unwrap();
    conn.set_user("other");
    assert_eq!(conn.user(), "other");
}

#[tokio::test]
async fn test_reconnect_loop_gives_up_on_communications_fault() {
    let driver = Arc::new(CountingDriver::default());
    driver.communications.store(true, Ordering::SeqCst);
    let conn = Connection::new(
        ConnectionSettings::new("mysql://db.invalid/app", "", Password::default())
            .with_max_connect_attempts(10)
            .with_reconnect_wait_secs(60),
        driver.clone(),
    );

    let err = conn.ensure_connected().await.unwrap_err();
    assert!(err.is_communications_fault());
    assert_eq!(driver.opens(), 1);
}

#[tokio::test]
async fn test_reconnect_loop_stops_at_ceiling() {
    let driver = CountingDriver::failing();
    let conn = Connection::new(
        ConnectionSettings::new("sqlite:unreachable.db", "", Password::default())
            .with_max_connect_attempts(2)
            .with_reconnect_wait_secs(0),
        driver.clone(),
    );

    let err = conn.ensure_connected().await.unwrap_err();
    assert!(matches!(err, DbError::TooManyFailedAttempts { .. }));
    assert_eq!(driver.opens(), 2);
}

#[tokio::test]
async fn test_manual_commit_and_rollback() {
    let url = temp_db();
    let setup = Connection::new(
        ConnectionSettings::new(&url, "", Password::default()),
        Arc::new(SqlxDriver),
    );
    let exec = db_layer::db::StatementExecutor::new(Arc::new(setup));
    exec.execute("CREATE TABLE t (a INTEGER)").await.unwrap();
    exec.connection().disconnect().await.unwrap();

    let manual = Arc::new(Connection::new(
        ConnectionSettings::new(&url, "manual", Password::default()).with_auto_commit(false),
        Arc::new(SqlxDriver),
    ));
    let tx = db_layer::db::StatementExecutor::new(Arc::clone(&manual));
    tx.execute("INSERT INTO t VALUES (1)").await.unwrap();
    manual.rollback().await.unwrap();
    assert_eq!(tx.query("SELECT a FROM t").await.unwrap().remaining(), 0);

    tx.execute("INSERT INTO t VALUES (2)").await.unwrap();
    manual.commit().await.unwrap();
    manual.disconnect().await.unwrap();

    let rows = exec.query("SELECT a FROM t").await.unwrap().into_row_set();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_statements_fail_when_offline() {
    let driver = CountingDriver::failing();
    let conn = Arc::new(Connection::new(
        ConnectionSettings::new("sqlite:unreachable.db", "", Password::default()),
        driver,
    ));
    let exec = db_layer::db::StatementExecutor::new(conn);
    let err = exec.query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, DbError::NotConnected { .. }));
}

/// Requires a running MySQL server.
/// Set TEST_MYSQL_URL environment variable to run this test.
#[tokio::test]
async fn test_mysql_connect_and_query() {
    let mysql_url = match std::env::var("TEST_MYSQL_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_URL not set");
            return;
        }
    };
    let conn = Arc::new(Connection::new(
        ConnectionSettings::new(mysql_url, "", Password::default()),
        Arc::new(SqlxDriver),
    ));
    let exec = db_layer::db::StatementExecutor::new(Arc::clone(&conn));
    assert!(exec.execute("SELECT 1").await.unwrap());
    conn.disconnect().await.unwrap();
}

/// Requires a running PostgreSQL server.
/// Set TEST_POSTGRES_URL environment variable to run this test.
#[tokio::test]
async fn test_postgres_connect_and_query() {
    let pg_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let conn = Arc::new(Connection::new(
        ConnectionSettings::new(pg_url, "", Password::default()),
        Arc::new(SqlxDriver),
    ));
    let exec = db_layer::db::StatementExecutor::new(Arc::clone(&conn));
    assert!(exec.execute("SELECT 1").await.unwrap());
    conn.disconnect().await.unwrap();
}
