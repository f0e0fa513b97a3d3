//! Process context.
//!
//! [`DbContext`] owns everything that lives for the whole process: the resolved
//! backend, the driver, the per-namespace connection registries, the list of all
//! connections, and the facade and table caches. It is built explicitly at
//! start-up and torn down with [`DbContext::shutdown`].

use crate::backend::{BackendCatalog, BackendDispatcher};
use crate::config::Config;
use crate::db::{Connection, ConnectionList, ConnectionRegistry, Driver, SqlxDriver};
use crate::error::DbResult;
use crate::facade::{FacadeRegistry, LogFacade, SqlFacade};
use crate::models::ConnectionSettings;
use crate::table::TableRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct DbContext {
    catalog: BackendCatalog,
    dispatcher: Arc<BackendDispatcher>,
    driver: Arc<dyn Driver>,
    registries: Mutex<HashMap<String, Arc<ConnectionRegistry>>>,
    all: Arc<ConnectionList>,
    facades: Arc<FacadeRegistry>,
    tables: Arc<TableRegistry>,
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("backend", &self.dispatcher.name())
            .field("connections", &self.all.len())
            .finish_non_exhaustive()
    }
}

impl DbContext {
    /// Build the context for the configured backend with the sqlx driver.
    pub fn new(config: &Config) -> DbResult<Self> {
        Self::with_driver(config, Arc::new(SqlxDriver))
    }

    /// Build the context with a custom driver.
    pub fn with_driver(config: &Config, driver: Arc<dyn Driver>) -> DbResult<Self> {
        Self::build(BackendCatalog::builtin(), config.backend.as_deref(), driver)
    }

    /// Build the context from an explicit catalog and backend name.
    pub fn build(
        catalog: BackendCatalog,
        backend: Option<&str>,
        driver: Arc<dyn Driver>,
    ) -> DbResult<Self> {
        let dispatcher = Arc::new(BackendDispatcher::resolve(&catalog, backend)?);
        let tables = TableRegistry::new();
        Ok(Self {
            catalog,
            facades: FacadeRegistry::new(Arc::clone(&dispatcher), Arc::clone(&tables)),
            dispatcher,
            driver,
            registries: Mutex::new(HashMap::new()),
            all: Arc::new(ConnectionList::new()),
            tables,
        })
    }

    pub fn dispatcher(&self) -> &Arc<BackendDispatcher> {
        &self.dispatcher
    }

    pub fn catalog(&self) -> &BackendCatalog {
        &self.catalog
    }

    /// Switch the active backend; existing facades follow on their next call.
    pub fn reconfigure(&self, backend: Option<&str>) -> DbResult<()> {
        self.dispatcher.reconfigure(&self.catalog, backend)
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The registry of a namespace, created on first use.
    pub fn registry(&self, namespace: &str) -> Arc<ConnectionRegistry> {
        let mut registries = self.registries.lock();
        Arc::clone(
            registries
                .entry(namespace.to_string())
                .or_insert_with(|| ConnectionRegistry::new(namespace, Arc::clone(&self.all))),
        )
    }

    /// The connection for `settings` in a namespace, created on first use.
    ///
    /// A new connection with connect-on-startup set is connected right away; a
    /// failure is recorded on the connection and not returned.
    pub async fn connection(
        &self,
        namespace: &str,
        settings: ConnectionSettings,
    ) -> Arc<Connection> {
        let registry = self.registry(namespace);
        let conn = registry.get_or_create(settings, Arc::clone(&self.driver));
        if conn.connect_on_startup() && !conn.is_connected() {
            if let Err(e) = conn.connect().await {
                warn!(url = %conn.masked_url(), error = %e, "Connect on startup failed");
            }
        }
        conn
    }

    pub fn sql(&self, conn: &Arc<Connection>) -> DbResult<Arc<SqlFacade>> {
        self.facades.sql(conn)
    }

    pub fn log(&self, conn: &Arc<Connection>) -> DbResult<Arc<LogFacade>> {
        self.facades.log(conn)
    }

    pub fn facades(&self) -> &Arc<FacadeRegistry> {
        &self.facades
    }

    pub fn tables(&self) -> &Arc<TableRegistry> {
        &self.tables
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.all.all()
    }

    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.all.active()
    }

    pub fn inactive_connections(&self) -> Vec<Arc<Connection>> {
        self.all.inactive()
    }

    /// Disconnect every connection ever created.
    pub async fn shutdown(&self) {
        let active = self.all.active();
        info!(active = active.len(), "Shutting down database context");
        for conn in active {
            if let Err(e) = conn.disconnect().await {
                error!(url = %conn.masked_url(), error = %e, "Failed to disconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::models::Password;

    fn context() -> DbContext {
        DbContext::build(BackendCatalog::builtin(), Some("generic"), Arc::new(SqlxDriver)).unwrap()
    }

    fn memory() -> ConnectionSettings {
        ConnectionSettings::new("sqlite::memory:", "", Password::default())
    }

    #[test]
    fn test_missing_backend_fails() {
        let err = DbContext::new(&Config::default()).unwrap_err();
        assert!(matches!(err, DbError::BackendUnresolved { .. }));
    }

    #[test]
    fn test_registries_are_per_namespace() {
        let ctx = context();
        let a = ctx.registry("a");
        assert!(Arc::ptr_eq(&a, &ctx.registry("a")));
        assert!(!Arc::ptr_eq(&a, &ctx.registry("b")));
    }

    #[tokio::test]
    async fn test_connect_on_startup_and_shutdown() {
        let ctx = context();
        let lazy = ctx.connection("app", memory()).await;
        assert!(!lazy.is_connected());

        let eager = ctx
            .connection(
                "app",
                ConnectionSettings::new("sqlite::memory:", "eager", Password::default())
                    .with_connect_on_startup(true),
            )
            .await;
        assert!(eager.is_connected());
        assert_eq!(ctx.active_connections().len(), 1);
        assert_eq!(ctx.inactive_connections().len(), 1);

        ctx.shutdown().await;
        assert!(ctx.active_connections().is_empty());
        assert_eq!(ctx.connections().len(), 2);
    }

    #[tokio::test]
    async fn test_same_settings_same_connection() {
        let ctx = context();
        let first = ctx.connection("app", memory()).await;
        let second = ctx.connection("app", memory()).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(ctx.sql(&first).is_ok());
    }
}
