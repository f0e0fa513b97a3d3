//! Backend resolution.
//!
//! Backends are registered in a [`BackendCatalog`] under a name; the
//! [`BackendDispatcher`] resolves the configured name once at start-up and fails
//! fast when it is missing or unknown.

use crate::backend::generic::GenericSql;
use crate::backend::log::{LogTable, SqlLogStorage};
use crate::backend::{LogCapability, SqlCapability};
use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Constructors of one concrete backend.
#[derive(Clone, Copy)]
pub struct BackendFactory {
    pub name: &'static str,
    /// Whether the backend can serve a connection of this database type.
    pub accepts: fn(DatabaseType) -> bool,
    pub sql: fn(Arc<Connection>) -> Arc<dyn SqlCapability>,
    pub log: fn(Arc<dyn SqlCapability>, Arc<LogTable>) -> Arc<dyn LogCapability>,
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn generic_sql(conn: Arc<Connection>) -> Arc<dyn SqlCapability> {
    Arc::new(GenericSql::new(conn))
}

fn sql_log(sql: Arc<dyn SqlCapability>, table: Arc<LogTable>) -> Arc<dyn LogCapability> {
    Arc::new(SqlLogStorage::new(sql, table))
}

/// Name-to-factory map of available backends.
#[derive(Debug, Clone, Default)]
pub struct BackendCatalog {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl BackendCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in backends: `generic`, `mysql`, `postgresql`, `sqlite`.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(BackendFactory {
            name: "generic",
            accepts: |_| true,
            sql: generic_sql,
            log: sql_log,
        });
        catalog.register(BackendFactory {
            name: "mysql",
            accepts: |db| db == DatabaseType::MySQL,
            sql: generic_sql,
            log: sql_log,
        });
        catalog.register(BackendFactory {
            name: "postgresql",
            accepts: |db| db == DatabaseType::PostgreSQL,
            sql: generic_sql,
            log: sql_log,
        });
        catalog.register(BackendFactory {
            name: "sqlite",
            accepts: |db| db == DatabaseType::SQLite,
            sql: generic_sql,
            log: sql_log,
        });
        catalog
    }

    /// Register (or replace) a backend under its name.
    pub fn register(&mut self, factory: BackendFactory) {
        self.factories.insert(factory.name, factory);
    }

    pub fn get(&self, name: &str) -> Option<BackendFactory> {
        self.factories.get(name.trim().to_lowercase().as_str()).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

/// The active backend of a process.
#[derive(Debug)]
pub struct BackendDispatcher {
    factory: RwLock<BackendFactory>,
    generation: AtomicU64,
    resolutions: AtomicU64,
}

impl BackendDispatcher {
    /// Resolve the configured backend name.
    pub fn resolve(catalog: &BackendCatalog, name: Option<&str>) -> DbResult<Self> {
        let factory = Self::lookup(catalog, name)?;
        info!(backend = factory.name, "Resolved database backend");
        Ok(Self {
            factory: RwLock::new(factory),
            generation: AtomicU64::new(0),
            resolutions: AtomicU64::new(0),
        })
    }

    fn lookup(catalog: &BackendCatalog, name: Option<&str>) -> DbResult<BackendFactory> {
        let name = name.map(str::trim).filter(|n| !n.is_empty()).ok_or_else(|| {
            DbError::backend_unresolved(format!(
                "No backend configured (available: {})",
                catalog.names().join(", ")
            ))
        })?;
        catalog.get(name).ok_or_else(|| {
            DbError::backend_unresolved(format!(
                "Unknown backend '{}' (available: {})",
                name,
                catalog.names().join(", ")
            ))
        })
    }

    /// Switch to another backend. Facades pick it up on their next call.
    pub fn reconfigure(&self, catalog: &BackendCatalog, name: Option<&str>) -> DbResult<()> {
        let factory = Self::lookup(catalog, name)?;
        *self.factory.write() = factory;
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(backend = factory.name, "Reconfigured database backend");
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.factory.read().name
    }

    /// Incremented on every reconfiguration.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of capability objects constructed so far.
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Whether the connection's URL scheme is served by the active backend.
    pub fn is_supported(&self, conn: &Connection) -> bool {
        let accepts = self.factory.read().accepts;
        conn.database_type().is_some_and(accepts)
    }

    /// Construct the SQL capability for a connection.
    pub fn sql(&self, conn: Arc<Connection>) -> DbResult<Arc<dyn SqlCapability>> {
        let factory = *self.factory.read();
        if !conn.database_type().is_some_and(factory.accepts) {
            return Err(DbError::invalid_input(format!(
                "Backend '{}' does not support {}",
                factory.name,
                conn.masked_url()
            )));
        }
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        debug!(backend = factory.name, url = %conn.masked_url(), "Constructing SQL backend");
        Ok((factory.sql)(conn))
    }

    /// Construct the log capability for a connection over its managed log table.
    pub fn log(
        &self,
        conn: Arc<Connection>,
        table: Arc<LogTable>,
    ) -> DbResult<Arc<dyn LogCapability>> {
        let sql = self.sql(conn)?;
        let factory = *self.factory.read();
        Ok((factory.log)(sql, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlxDriver;
    use crate::models::{ConnectionSettings, Password};

    fn conn(url: &str) -> Arc<Connection> {
        Arc::new(Connection::new(
            ConnectionSettings::new(url, "", Password::default()),
            Arc::new(SqlxDriver),
        ))
    }

    #[test]
    fn test_missing_backend_is_unresolved() {
        let catalog = BackendCatalog::builtin();
        assert!(matches!(
            BackendDispatcher::resolve(&catalog, None),
            Err(DbError::BackendUnresolved { .. })
        ));
        assert!(matches!(
            BackendDispatcher::resolve(&catalog, Some("  ")),
            Err(DbError::BackendUnresolved { .. })
        ));
        assert!(matches!(
            BackendDispatcher::resolve(&catalog, Some("oracle")),
            Err(DbError::BackendUnresolved { .. })
        ));
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let catalog = BackendCatalog::builtin();
        let dispatcher = BackendDispatcher::resolve(&catalog, Some("SQLite")).unwrap();
        assert_eq!(dispatcher.name(), "sqlite");
    }

    #[test]
    fn test_is_supported() {
        let catalog = BackendCatalog::builtin();
        let dispatcher = BackendDispatcher::resolve(&catalog, Some("mysql")).unwrap();
        assert!(dispatcher.is_supported(&conn("mysql://localhost/db")));
        assert!(!dispatcher.is_supported(&conn("sqlite::memory:")));
        assert!(dispatcher.sql(conn("sqlite::memory:")).is_err());
        assert_eq!(dispatcher.resolutions(), 0);

        let generic = BackendDispatcher::resolve(&catalog, Some("generic")).unwrap();
        assert!(generic.is_supported(&conn("sqlite::memory:")));
        assert!(!generic.is_supported(&conn("oracle://host/db")));
    }

    #[test]
    fn test_resolution_counter_and_reconfigure() {
        let catalog = BackendCatalog::builtin();
        let dispatcher = BackendDispatcher::resolve(&catalog, Some("generic")).unwrap();
        dispatcher.sql(conn("sqlite::memory:")).unwrap();
        let memory = conn("sqlite::memory:");
        let table = Arc::new(LogTable::new(Arc::new(GenericSql::new(Arc::clone(&memory)))));
        dispatcher.log(memory, table).unwrap();
        assert_eq!(dispatcher.resolutions(), 2);

        assert_eq!(dispatcher.generation(), 0);
        dispatcher.reconfigure(&catalog, Some("sqlite")).unwrap();
        assert_eq!(dispatcher.generation(), 1);
        assert_eq!(dispatcher.name(), "sqlite");
        assert!(dispatcher.reconfigure(&catalog, Some("nope")).is_err());
        assert_eq!(dispatcher.name(), "sqlite");
    }
}
