//! Physical connection handles and the driver that opens them.
//!
//! A [`DbHandle`] wraps exactly one database-specific sqlx connection (no
//! pooling). The [`Driver`] trait is the seam between a logical
//! [`Connection`](crate::db::Connection) and the network, so tests can count or
//! fail open attempts without a server.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionSettings, DatabaseType};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection as _};
use std::str::FromStr;
use tracing::{debug, warn};

/// Database-specific physical connection (avoids AnyConnection limitations).
#[derive(Debug)]
pub enum DbHandle {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbHandle {
    /// Close the physical connection.
    pub async fn close(self) -> DbResult<()> {
        let result = match self {
            DbHandle::MySql(c) => c.close().await,
            DbHandle::Postgres(c) => c.close().await,
            DbHandle::SQLite(c) => c.close().await,
        };
        result.map_err(DbError::from)
    }

    /// Get the database type for this handle.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbHandle::MySql(_) => DatabaseType::MySQL,
            DbHandle::Postgres(_) => DatabaseType::PostgreSQL,
            DbHandle::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Opens physical connections for connection settings.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn open(&self, settings: &ConnectionSettings) -> DbResult<DbHandle>;
}

/// The production driver, backed by sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxDriver;

#[async_trait]
impl Driver for SqlxDriver {
    async fn open(&self, settings: &ConnectionSettings) -> DbResult<DbHandle> {
        let db_type = settings.database_type().ok_or_else(|| {
            DbError::connection(
                format!("Unsupported connection URL: {}", settings.masked_url()),
                "Use a postgres://, mysql:// or sqlite: URL",
            )
        })?;

        debug!(
            url = %settings.masked_url(),
            user = %settings.user,
            db_type = %db_type,
            "Opening physical connection"
        );

        match db_type {
            DatabaseType::MySQL => {
                let mut options = MySqlConnectOptions::from_str(&settings.url)
                    .map_err(|e| {
                        DbError::connection(
                            format!("Invalid MySQL connection string: {}", e),
                            "Check the connection URL format: mysql://host:port/database",
                        )
                    })?
                    .charset("utf8mb4");
                if !settings.user.is_empty() {
                    options = options.username(&settings.user);
                }
                if !settings.password.is_empty() {
                    options = options.password(settings.password.expose());
                }
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| open_error(db_type, e))?;
                Ok(DbHandle::MySql(conn))
            }
            DatabaseType::PostgreSQL => {
                let mut options = PgConnectOptions::from_str(&settings.url).map_err(|e| {
                    DbError::connection(
                        format!("Invalid PostgreSQL connection string: {}", e),
                        "Check the connection URL format: postgres://host:port/database",
                    )
                })?;
                if !settings.user.is_empty() {
                    options = options.username(&settings.user);
                }
                if !settings.password.is_empty() {
                    options = options.password(settings.password.expose());
                }
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| open_error(db_type, e))?;
                Ok(DbHandle::Postgres(conn))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&settings.url)
                    .map_err(|e| {
                        DbError::connection(
                            format!("Invalid SQLite connection string: {}", e),
                            "Check the connection URL format: sqlite:path/to/db.sqlite",
                        )
                    })?
                    .create_if_missing(true);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| open_error(db_type, e))?;
                Ok(DbHandle::SQLite(conn))
            }
        }
    }
}

/// Classify a failed open: link-level failures are communications faults.
fn open_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    match &error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            warn!(db_type = %db_type, error = %error, "Communications failure while connecting");
            DbError::communications(format!("Failed to connect: {}", error))
        }
        _ => DbError::connection(
            format!("Failed to connect: {}", error),
            connection_suggestion(db_type, &error),
        ),
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => {
            "Verify the connection string format: postgres://host:5432/db".to_string()
        }
        DatabaseType::MySQL => "Verify the connection string format: mysql://host:3306/db".to_string(),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Password;

    #[tokio::test]
    async fn test_open_sqlite_memory() {
        let settings = ConnectionSettings::new("sqlite::memory:", "", Password::default());
        let handle = SqlxDriver.open(&settings).await.unwrap();
        assert_eq!(handle.db_type(), DatabaseType::SQLite);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_unsupported_scheme() {
        let settings = ConnectionSettings::new("oracle://host/db", "", Password::default());
        let err = SqlxDriver.open(&settings).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_sqlite_directory_fails() {
        let settings = ConnectionSettings::new(
            "sqlite:/nonexistent-dir/sub/db.sqlite",
            "",
            Password::default(),
        );
        assert!(SqlxDriver.open(&settings).await.is_err());
    }

    #[test]
    fn test_io_open_error_is_communications_fault() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = open_error(DatabaseType::MySQL, sqlx::Error::Io(io));
        assert!(err.is_communications_fault());
    }
}
