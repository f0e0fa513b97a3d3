//! Identity-keyed connection caches.
//!
//! One [`ConnectionRegistry`] exists per logical namespace (e.g. one per
//! application subsystem). Every connection added to any registry is also
//! recorded in a shared [`ConnectionList`] used for diagnostics.

use crate::db::connection::Connection;
use crate::db::driver::Driver;
use crate::models::{ConnectionIdentity, ConnectionSettings};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Every connection ever registered, in registration order.
#[derive(Debug, Default)]
pub struct ConnectionList {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection; the same instance is only recorded once.
    pub fn record(&self, conn: &Arc<Connection>) {
        let mut connections = self.connections.lock();
        if !connections.iter().any(|c| c.id() == conn.id()) {
            connections.push(Arc::clone(conn));
        }
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    pub fn active(&self) -> Vec<Arc<Connection>> {
        self.all().into_iter().filter(|c| c.is_connected()).collect()
    }

    pub fn inactive(&self) -> Vec<Arc<Connection>> {
        self.all().into_iter().filter(|c| !c.is_connected()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connections of one namespace, keyed by identity, plus a default.
#[derive(Debug)]
pub struct ConnectionRegistry {
    namespace: String,
    connections: RwLock<HashMap<ConnectionIdentity, Arc<Connection>>>,
    default: RwLock<Option<Arc<Connection>>>,
    all: Arc<ConnectionList>,
}

impl ConnectionRegistry {
    pub fn new(namespace: impl Into<String>, all: Arc<ConnectionList>) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.into(),
            connections: RwLock::new(HashMap::new()),
            default: RwLock::new(None),
            all,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, identity: &ConnectionIdentity) -> Option<Arc<Connection>> {
        self.connections.read().get(identity).cloned()
    }

    pub fn has(&self, identity: &ConnectionIdentity) -> bool {
        self.connections.read().contains_key(identity)
    }

    /// Register a connection under its identity, returning the entry it replaced.
    ///
    /// Replacing a still-open connection does not close it.
    pub fn add(self: &Arc<Self>, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        conn.set_owner(self);
        self.all.record(&conn);
        let identity = conn.identity();
        let previous = self.connections.write().insert(identity, Arc::clone(&conn));
        debug!(
            namespace = %self.namespace,
            url = %conn.masked_url(),
            replaced = previous.is_some(),
            "Registered connection"
        );
        previous.filter(|p| !Arc::ptr_eq(p, &conn))
    }

    /// The cached connection for the settings' identity, creating it if absent.
    pub fn get_or_create(
        self: &Arc<Self>,
        settings: ConnectionSettings,
        driver: Arc<dyn Driver>,
    ) -> Arc<Connection> {
        let identity = settings.identity();
        let mut connections = self.connections.write();
        if let Some(existing) = connections.get(&identity) {
            return Arc::clone(existing);
        }
        let conn = Arc::new(Connection::new(settings, driver));
        conn.set_owner(self);
        self.all.record(&conn);
        connections.insert(identity, Arc::clone(&conn));
        info!(
            namespace = %self.namespace,
            url = %conn.masked_url(),
            user = %conn.user(),
            "Created connection"
        );
        conn
    }

    /// Move the entry of connection `id` from one identity to another.
    ///
    /// Fails when `to` already belongs to a different connection. A connection
    /// not cached under `from` (e.g. replaced through [`add`](Self::add)) is
    /// left out of the cache.
    pub(crate) fn rekey(&self, from: &ConnectionIdentity, to: &ConnectionIdentity, id: Uuid) -> bool {
        let mut connections = self.connections.write();
        if connections.get(to).is_some_and(|c| c.id() != id) {
            return false;
        }
        let moved = connections.get(from).filter(|c| c.id() == id).cloned();
        if let Some(conn) = moved {
            connections.remove(from);
            connections.insert(to.clone(), conn);
            debug!(namespace = %self.namespace, connection = %id, "Re-keyed connection");
        }
        true
    }

    pub fn set_default(&self, conn: Arc<Connection>) {
        info!(namespace = %self.namespace, url = %conn.masked_url(), "Setting default connection");
        *self.default.write() = Some(conn);
    }

    pub fn default_connection(&self) -> Option<Arc<Connection>> {
        self.default.read().clone()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::SqlxDriver;
    use crate::models::Password;

    fn settings(url: &str, pw: &str) -> ConnectionSettings {
        ConnectionSettings::new(url, "user", Password::new(pw))
    }

    #[test]
    fn test_get_or_create_caches_by_identity() {
        let registry = ConnectionRegistry::new("test", Arc::new(ConnectionList::new()));
        let driver: Arc<dyn Driver> = Arc::new(SqlxDriver);
        let a = registry.get_or_create(settings("sqlite::memory:", "p"), Arc::clone(&driver));
        let b = registry.get_or_create(settings("sqlite::memory:", "p"), Arc::clone(&driver));
        let c = registry.get_or_create(settings("sqlite::memory:", "q"), driver);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert!(registry.has(&a.identity()));
        assert!(Arc::ptr_eq(&a.owner().unwrap(), &registry));
    }

    #[test]
    fn test_add_replaces_same_identity() {
        let all = Arc::new(ConnectionList::new());
        let registry = ConnectionRegistry::new("test", Arc::clone(&all));
        let first = Arc::new(Connection::new(settings("sqlite::memory:", ""), Arc::new(SqlxDriver)));
        let second = Arc::new(Connection::new(settings("sqlite::memory:", ""), Arc::new(SqlxDriver)));
        assert!(registry.add(Arc::clone(&first)).is_none());
        // re-adding the same instance is idempotent
        assert!(registry.add(Arc::clone(&first)).is_none());
        let replaced = registry.add(Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
        // both remain visible for diagnostics
        assert_eq!(all.len(), 2);
        assert_eq!(all.inactive().len(), 2);
    }

    #[test]
    fn test_identity_change_moves_registry_entry() {
        let registry = ConnectionRegistry::new("test", Arc::new(ConnectionList::new()));
        let driver: Arc<dyn Driver> = Arc::new(SqlxDriver);
        let a = registry.get_or_create(settings("sqlite:one.db", "p"), Arc::clone(&driver));
        a.set_url("sqlite:two.db");
        assert_eq!(a.url(), "sqlite:two.db");
        assert_eq!(registry.len(), 1);

        let same = registry.get_or_create(settings("sqlite:two.db", "p"), Arc::clone(&driver));
        assert!(Arc::ptr_eq(&a, &same));

        let fresh = registry.get_or_create(settings("sqlite:one.db", "p"), driver);
        assert!(!Arc::ptr_eq(&a, &fresh));
        assert_eq!(fresh.url(), "sqlite:one.db");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_identity_change_onto_taken_identity_is_ignored() {
        let registry = ConnectionRegistry::new("test", Arc::new(ConnectionList::new()));
        let driver: Arc<dyn Driver> = Arc::new(SqlxDriver);
        let a = registry.get_or_create(settings("sqlite:one.db", "p"), Arc::clone(&driver));
        let b = registry.get_or_create(settings("sqlite:two.db", "p"), driver);
        a.set_url("sqlite:two.db");
        assert_eq!(a.url(), "sqlite:one.db");
        assert!(Arc::ptr_eq(&registry.get(&b.identity()).unwrap(), &b));
        assert!(Arc::ptr_eq(&registry.get(&a.identity()).unwrap(), &a));
    }

    #[test]
    fn test_default_is_independent_of_cache() {
        let registry = ConnectionRegistry::new("test", Arc::new(ConnectionList::new()));
        assert!(registry.default_connection().is_none());
        let conn = Arc::new(Connection::new(settings("sqlite::memory:", ""), Arc::new(SqlxDriver)));
        registry.set_default(Arc::clone(&conn));
        assert!(Arc::ptr_eq(&registry.default_connection().unwrap(), &conn));
        assert!(registry.is_empty());
    }
}
