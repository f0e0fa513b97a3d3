//! Database Access Layer Library
//!
//! This library manages logical database connections (SQLite, PostgreSQL,
//! MySQL) with retry ceilings and change events, dispatches generic SQL and
//! log-storage capabilities to a configured backend, and reconciles declared
//! table specifications with live schemas.

pub mod backend;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod facade;
pub mod history;
pub mod models;
pub mod table;

pub use config::Config;
pub use context::DbContext;
pub use error::{DbError, DbResult};
