//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod log;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionIdentity, ConnectionParameters,
    ConnectionSettings, ConnectionSummary, DEFAULT_LOGGING_LEVEL, DEFAULT_MAX_CONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_WAIT_SECS, DatabaseType, Password, mask_url, short_url,
};
pub use log::{LogConditions, LogEntry, STATUS_NEW};
pub use query::{QueryParam, RowSet, UpdateOutcome};
pub use schema::{
    ColumnType, IndexColumn, IndexSpec, LiveColumn, SqlType, TableSpec, TypeFamily, type_family,
};
