//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Connection-level failures are reported as values so callers can degrade to an
//! "offline" behaviour; only [`DbError::BackendUnresolved`] is meant to stop a process.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Not connected: {target}")]
    NotConnected { target: String },

    #[error("Too many failed connection attempts ({attempts}): {message}")]
    TooManyFailedAttempts { message: String, attempts: u32 },

    #[error("Transient driver error: {message}")]
    TransientDriver { message: String },

    #[error("Communications fault: {message}")]
    CommunicationsFault { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema mismatch on table '{table}': {message}")]
    SchemaMismatch { message: String, table: String },

    #[error("DDL failure on table '{table}': {message}")]
    DdlFailure { message: String, table: String },

    #[error("Backend unresolved: {message}")]
    BackendUnresolved { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a not-connected error for the given (masked) target.
    pub fn not_connected(target: impl Into<String>) -> Self {
        Self::NotConnected {
            target: target.into(),
        }
    }

    /// Create an error for an exhausted connect-attempt ceiling.
    pub fn too_many_failed_attempts(message: impl Into<String>, attempts: u32) -> Self {
        Self::TooManyFailedAttempts {
            message: message.into(),
            attempts,
        }
    }

    /// Create a transient driver error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientDriver {
            message: message.into(),
        }
    }

    /// Create a communications fault.
    pub fn communications(message: impl Into<String>) -> Self {
        Self::CommunicationsFault {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>, table: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
            table: table.into(),
        }
    }

    /// Create a DDL failure.
    pub fn ddl_failure(message: impl Into<String>, table: impl Into<String>) -> Self {
        Self::DdlFailure {
            message: message.into(),
            table: table.into(),
        }
    }

    /// Create a backend resolution error.
    pub fn backend_unresolved(message: impl Into<String>) -> Self {
        Self::BackendUnresolved {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NotConnected { .. } => Some("Connect the database connection first"),
            Self::TooManyFailedAttempts { .. } => {
                Some("Fix the URL or credentials, then change them or raise the attempt limit")
            }
            Self::BackendUnresolved { .. } => {
                Some("Set the backend key to one of the registered backends")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Communications faults are never retryable, even inside a retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::TransientDriver { .. })
    }

    /// Check if this error is a transient driver failure (statements retry these once).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDriver { .. })
    }

    /// Check if this error is a lower-level communications fault.
    pub fn is_communications_fault(&self) -> bool {
        matches!(self, Self::CommunicationsFault { .. })
    }

    /// Replace every occurrence of `secret` in the message with a mask.
    pub fn masked(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        let mask = |s: String| s.replace(secret, "******");
        match self {
            Self::Connection {
                message,
                suggestion,
            } => Self::Connection {
                message: mask(message),
                suggestion,
            },
            Self::TooManyFailedAttempts { message, attempts } => Self::TooManyFailedAttempts {
                message: mask(message),
                attempts,
            },
            Self::TransientDriver { message } => Self::TransientDriver {
                message: mask(message),
            },
            Self::CommunicationsFault { message } => Self::CommunicationsFault {
                message: mask(message),
            },
            Self::Database {
                message,
                sql_state,
                suggestion,
            } => Self::Database {
                message: mask(message),
                sql_state,
                suggestion,
            },
            Self::Internal { message } => Self::Internal {
                message: mask(message),
            },
            other => other,
        }
    }
}

/// Convert sqlx errors raised by statements to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::transient("connection acquire timed out"),
            sqlx::Error::PoolClosed => DbError::not_connected("connection is closed"),
            sqlx::Error::Io(io_err) => DbError::transient(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::communications(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::transient(format!("Protocol error: {}", msg)),
            sqlx::Error::WorkerCrashed => DbError::transient("Database worker crashed"),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
