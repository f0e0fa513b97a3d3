//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Physical handles and the driver that opens them
//! - Logical connections with retry ceilings and change events
//! - Identity-keyed connection registries
//! - Statement execution
//! - Live schema metadata
//! - Row decoding and parameter binding
//! - Database dispatch macros for reducing code duplication

pub mod connection;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod metadata;
pub mod params;
pub mod registry;
pub mod types;

pub use connection::{Connection, ConnectionListener, ListenerId};
pub use driver::{DbHandle, Driver, SqlxDriver};
pub use executor::{Cursor, PreparedStatement, StatementExecutor, StatementGuard};
pub use registry::{ConnectionList, ConnectionRegistry};
