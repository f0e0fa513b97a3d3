//! Logical database connections.
//!
//! A [`Connection`] is one logical endpoint (URL, user, password, autocommit,
//! retry policy) owning at most one physical [`DbHandle`]. State transitions
//! (`connect`, `disconnect`, `retry_connect`) are serialized on a per-connection
//! async mutex; listeners are notified synchronously, in registration order,
//! after every transition.
//!
//! Failed physical connects are counted per identity (URL, user, password). Once
//! the count reaches the configured maximum, `connect` fails immediately without
//! touching the network until the settings change or a connect succeeds.

use crate::db::driver::{DbHandle, Driver};
use crate::db::executor::{self, StatementGuard};
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionEvent, ConnectionEventKind, ConnectionIdentity, ConnectionParameters,
    ConnectionSettings, ConnectionSummary, DatabaseType, Password, short_url,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Length of one sleep tick in the reconnect loop.
const RECONNECT_TICK: Duration = Duration::from_millis(100);

/// Handle returned by [`Connection::add_listener`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receives connect/disconnect notifications.
///
/// Called synchronously on the task performing the transition; slow listeners
/// delay the caller.
pub trait ConnectionListener: Send + Sync {
    fn connection_changed(&self, event: &ConnectionEvent);
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn connection_changed(&self, event: &ConnectionEvent) {
        self(event)
    }
}

pub struct Connection {
    id: Uuid,
    settings: RwLock<ConnectionSettings>,
    handle: tokio::sync::Mutex<Option<DbHandle>>,
    connected: AtomicBool,
    last_error: Mutex<String>,
    last_fault_communications: AtomicBool,
    failed_attempts: Mutex<HashMap<ConnectionIdentity, u32>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ConnectionListener>)>>,
    next_listener: AtomicU64,
    driver: Arc<dyn Driver>,
    owner: Mutex<Weak<ConnectionRegistry>>,
    open_statements: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.masked_url())
            .field("user", &self.user())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a disconnected connection.
    pub fn new(settings: ConnectionSettings, driver: Arc<dyn Driver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings: RwLock::new(settings),
            handle: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
            last_fault_communications: AtomicBool::new(false),
            failed_attempts: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            driver,
            owner: Mutex::new(Weak::new()),
            open_statements: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Instance id, distinct for every connection object.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings.read().clone()
    }

    pub fn url(&self) -> String {
        self.settings.read().url.clone()
    }

    pub fn user(&self) -> String {
        self.settings.read().user.clone()
    }

    pub fn masked_url(&self) -> String {
        self.settings.read().masked_url()
    }

    /// Short display form of the URL, e.g. `dbhost/mydb`.
    pub fn short_url(&self) -> String {
        short_url(&self.settings.read().url)
    }

    pub fn auto_commit(&self) -> bool {
        self.settings.read().auto_commit
    }

    pub fn max_connect_attempts(&self) -> u32 {
        self.settings.read().max_connect_attempts
    }

    pub fn reconnect_wait_secs(&self) -> u64 {
        self.settings.read().reconnect_wait_secs
    }

    pub fn connect_on_startup(&self) -> bool {
        self.settings.read().connect_on_startup
    }

    pub fn identity(&self) -> ConnectionIdentity {
        self.settings.read().identity()
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        self.settings.read().database_type()
    }

    /// The persisted-history tuple of this connection.
    pub fn parameters(&self) -> ConnectionParameters {
        ConnectionParameters::from_settings(&self.settings.read())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Message of the last failure (credentials masked), empty if none.
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Consecutive failed connects for the current identity.
    pub fn failed_attempts(&self) -> u32 {
        let identity = self.identity();
        self.failed_attempts
            .lock()
            .get(&identity)
            .copied()
            .unwrap_or(0)
    }

    pub fn open_statements(&self) -> usize {
        self.open_statements.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// The registry this connection was added to, if it is still alive.
    pub fn owner(&self) -> Option<Arc<ConnectionRegistry>> {
        self.owner.lock().upgrade()
    }

    pub(crate) fn set_owner(&self, registry: &Arc<ConnectionRegistry>) {
        *self.owner.lock() = Arc::downgrade(registry);
    }

    // -------------------------------------------------------------------------
    // Setters: ignored while connected or while a transition is in progress
    // -------------------------------------------------------------------------

    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.update_settings("url", |s| s.url = url);
    }

    pub fn set_user(&self, user: impl Into<String>) {
        let user = user.into();
        self.update_settings("user", |s| s.user = user);
    }

    pub fn set_password(&self, password: Password) {
        self.update_settings("password", |s| s.password = password);
    }

    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.update_settings("auto_commit", |s| s.auto_commit = auto_commit);
    }

    pub fn set_max_connect_attempts(&self, attempts: u32) {
        self.update_settings("max_connect_attempts", |s| {
            s.max_connect_attempts = attempts.max(1)
        });
    }

    pub fn set_reconnect_wait_secs(&self, secs: u64) {
        self.update_settings("reconnect_wait_secs", |s| s.reconnect_wait_secs = secs);
    }

    pub fn set_connect_on_startup(&self, connect: bool) {
        self.update_settings("connect_on_startup", |s| s.connect_on_startup = connect);
    }

    fn update_settings(&self, field: &str, apply: impl FnOnce(&mut ConnectionSettings)) {
        if self.is_connected() {
            debug!(field = field, url = %self.masked_url(), "Ignoring setting change while connected");
            return;
        }
        let Ok(_transition) = self.handle.try_lock() else {
            debug!(field = field, url = %self.masked_url(), "Ignoring setting change while connecting");
            return;
        };
        if self.is_connected() {
            return;
        }

        let current = self.settings();
        let mut updated = current.clone();
        apply(&mut updated);
        let (from, to) = (current.identity(), updated.identity());
        if from != to {
            // The owning registry is keyed by identity and must follow the change
            if let Some(owner) = self.owner() {
                if !owner.rekey(&from, &to, self.id) {
                    warn!(
                        field = field,
                        url = %updated.masked_url(),
                        namespace = owner.namespace(),
                        "Ignoring setting change: another connection has this identity"
                    );
                    return;
                }
            }
        }
        *self.settings.write() = updated;
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Unregister a listener; returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    fn notify(&self, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            kind,
            connection_id: self.id,
            identity: self.identity(),
        };
        let snapshot: Vec<Arc<dyn ConnectionListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for (index, listener) in snapshot.iter().enumerate() {
            let start = Instant::now();
            listener.connection_changed(&event);
            debug!(
                connection = %self.id,
                event = ?kind,
                listener = index,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Listener handled connection event"
            );
        }
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Open the physical connection. Succeeds immediately when already connected.
    pub async fn connect(&self) -> DbResult<()> {
        let mut slot = self.handle.lock().await;
        self.connect_locked(&mut slot).await
    }

    /// Close the physical connection, if open.
    pub async fn disconnect(&self) -> DbResult<()> {
        let mut slot = self.handle.lock().await;
        self.disconnect_locked(&mut slot).await
    }

    /// Disconnect followed by connect, as one transition.
    pub async fn retry_connect(&self) -> DbResult<()> {
        let mut slot = self.handle.lock().await;
        if let Err(e) = self.disconnect_locked(&mut slot).await {
            warn!(url = %self.masked_url(), error = %e, "Disconnect before reconnect failed");
        }
        self.connect_locked(&mut slot).await
    }

    /// Keep connecting until connected, sleeping up to the reconnect wait between
    /// attempts.
    ///
    /// Gives up on a communications fault or once the attempt ceiling is reached.
    /// Dropping the returned future cancels the loop.
    pub async fn ensure_connected(&self) -> DbResult<()> {
        loop {
            let error = match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if error.is_communications_fault()
                || self.last_fault_communications.load(Ordering::SeqCst)
            {
                error!(url = %self.masked_url(), error = %error, "Communications fault, giving up");
                return Err(error);
            }
            if matches!(error, DbError::TooManyFailedAttempts { .. }) {
                return Err(error);
            }

            let ticks = self.reconnect_wait_secs().saturating_mul(10);
            info!(
                url = %self.masked_url(),
                wait_secs = self.reconnect_wait_secs(),
                "Waiting before reconnecting"
            );
            for _ in 0..ticks {
                if self.attempts_exhausted() {
                    return Err(self.too_many_attempts_error());
                }
                tokio::time::sleep(RECONNECT_TICK).await;
            }
            if self.attempts_exhausted() {
                return Err(self.too_many_attempts_error());
            }
        }
    }

    fn attempts_exhausted(&self) -> bool {
        self.failed_attempts() >= self.max_connect_attempts().max(1)
    }

    fn too_many_attempts_error(&self) -> DbError {
        let attempts = self.failed_attempts();
        DbError::too_many_failed_attempts(
            format!(
                "Too many failed connection attempts: URL={}, user={}",
                self.masked_url(),
                self.user()
            ),
            attempts,
        )
    }

    async fn connect_locked(&self, slot: &mut Option<DbHandle>) -> DbResult<()> {
        if slot.is_some() {
            return Ok(());
        }

        let settings = self.settings();
        let identity = settings.identity();
        self.last_error.lock().clear();
        self.last_fault_communications.store(false, Ordering::SeqCst);

        let attempts = self
            .failed_attempts
            .lock()
            .get(&identity)
            .copied()
            .unwrap_or(0);
        if attempts >= settings.max_connect_attempts.max(1) {
            let message = format!(
                "Maximum number of connection attempts reached: URL={}, user={}, pw={}",
                settings.masked_url(),
                settings.user,
                settings.password.masked()
            );
            warn!(attempts = attempts, "{}", message);
            *self.last_error.lock() = message.clone();
            return Err(DbError::too_many_failed_attempts(message, attempts));
        }

        info!(url = %settings.masked_url(), user = %settings.user, "Connecting to database");
        let start = Instant::now();

        match self.open_physical(&settings).await {
            Ok(handle) => {
                *slot = Some(handle);
                self.connected.store(true, Ordering::SeqCst);
                self.failed_attempts.lock().remove(&identity);
                info!(
                    url = %settings.masked_url(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Connected successfully"
                );
                self.notify(ConnectionEventKind::Connect);
                Ok(())
            }
            Err(e) => {
                let e = e.masked(settings.password.expose());
                let count = {
                    let mut failed = self.failed_attempts.lock();
                    let count = failed.entry(identity).or_insert(0);
                    *count += 1;
                    *count
                };
                let message = format!(
                    "Failed to connect to database (attempt {}/{}): URL={}, user={}, pw={}: {}",
                    count,
                    settings.max_connect_attempts.max(1),
                    settings.masked_url(),
                    settings.user,
                    settings.password.masked(),
                    e
                );
                warn!("{}", message);
                *self.last_error.lock() = message;
                self.last_fault_communications
                    .store(e.is_communications_fault(), Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Open a handle and apply the autocommit mode.
    async fn open_physical(&self, settings: &ConnectionSettings) -> DbResult<DbHandle> {
        let mut handle = self.driver.open(settings).await?;
        if !settings.auto_commit {
            if let Err(e) = executor::run_raw(&mut handle, "BEGIN").await {
                if let Err(close_err) = handle.close().await {
                    error!(error = %close_err, "Failed to close handle after BEGIN failure");
                }
                return Err(e);
            }
        }
        Ok(handle)
    }

    async fn disconnect_locked(&self, slot: &mut Option<DbHandle>) -> DbResult<()> {
        let Some(handle) = slot.take() else {
            self.connected.store(false, Ordering::SeqCst);
            debug!(url = %self.masked_url(), "Disconnect without a physical connection");
            self.notify(ConnectionEventKind::Disconnect);
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);

        let result = handle.close().await;
        match &result {
            Ok(()) => info!(url = %self.masked_url(), "Disconnected"),
            Err(e) => {
                let e = e.clone().masked(self.settings.read().password.expose());
                error!(url = %self.masked_url(), error = %e, "Failed to close connection");
                *self.last_error.lock() = e.to_string();
            }
        }
        self.notify(ConnectionEventKind::Disconnect);
        result.map_err(|e| self.mask_error(e))
    }

    // -------------------------------------------------------------------------
    // Transactions (only meaningful with autocommit off)
    // -------------------------------------------------------------------------

    /// Commit the open transaction and start a new one.
    pub async fn commit(&self) -> DbResult<()> {
        self.end_transaction("COMMIT").await
    }

    /// Roll back the open transaction and start a new one.
    pub async fn rollback(&self) -> DbResult<()> {
        self.end_transaction("ROLLBACK").await
    }

    async fn end_transaction(&self, statement: &str) -> DbResult<()> {
        if self.auto_commit() {
            return Ok(());
        }
        let mut slot = self.handle.lock().await;
        let handle = slot
            .as_mut()
            .ok_or_else(|| DbError::not_connected(self.masked_url()))?;
        executor::run_raw(handle, statement).await?;
        executor::run_raw(handle, "BEGIN").await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Statement support
    // -------------------------------------------------------------------------

    /// Lock the physical handle, connecting first if needed.
    pub(crate) async fn acquire(&self) -> DbResult<MutexGuard<'_, Option<DbHandle>>> {
        let mut slot = self.handle.lock().await;
        if slot.is_none() {
            if let Err(e) = self.connect_locked(&mut slot).await {
                debug!(url = %self.masked_url(), error = %e, "No physical connection available");
                return Err(DbError::not_connected(format!(
                    "{} ({})",
                    self.masked_url(),
                    e
                )));
            }
        }
        Ok(slot)
    }

    /// Mask a statement result; a link failure that survived the retry drops
    /// the physical handle so the next statement reconnects.
    pub(crate) fn settle<T>(&self, slot: &mut Option<DbHandle>, result: DbResult<T>) -> DbResult<T> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => self.mask_error(e),
        };
        if error.is_transient() || error.is_communications_fault() {
            if let Some(handle) = slot.take() {
                self.connected.store(false, Ordering::SeqCst);
                warn!(url = %self.masked_url(), error = %error, "Dropping broken physical connection");
                *self.last_error.lock() = error.to_string();
                // The link is gone; closing would only fail again
                drop(handle);
                self.notify(ConnectionEventKind::Disconnect);
            }
        }
        Err(error)
    }

    pub(crate) fn statement_guard(&self) -> StatementGuard {
        StatementGuard::new(Arc::clone(&self.open_statements))
    }

    pub(crate) fn mask_error(&self, error: DbError) -> DbError {
        error.masked(self.settings.read().password.expose())
    }

    pub fn summary(&self) -> ConnectionSummary {
        let settings = self.settings();
        ConnectionSummary {
            id: self.id,
            name: short_url(&settings.url),
            url: settings.masked_url(),
            user: settings.user.clone(),
            database_type: settings.database_type(),
            connected: self.is_connected(),
            auto_commit: settings.auto_commit,
            failed_attempts: self.failed_attempts(),
            listeners: self.listener_count(),
            open_statements: self.open_statements(),
            last_error: self.last_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::SqlxDriver;

    fn memory() -> Connection {
        Connection::new(
            ConnectionSettings::new("sqlite::memory:", "", Password::default()),
            Arc::new(SqlxDriver),
        )
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let conn = memory();
        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        // second connect is a no-op
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected());
        // disconnecting again still succeeds
        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_listeners_in_registration_order() {
        let conn = memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            conn.add_listener(Arc::new(move |e: &ConnectionEvent| {
                seen.lock().push((tag, e.kind));
            }));
        }
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                ("first", ConnectionEventKind::Connect),
                ("second", ConnectionEventKind::Connect),
                ("first", ConnectionEventKind::Disconnect),
                ("second", ConnectionEventKind::Disconnect),
            ]
        );
    }

    fn record_events(conn: &Connection) -> Arc<Mutex<Vec<ConnectionEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.add_listener(Arc::new(move |e: &ConnectionEvent| sink.lock().push(e.kind)));
        seen
    }

    #[tokio::test]
    async fn test_disconnect_fires_without_handle() {
        let conn = memory();
        let seen = record_events(&conn);
        conn.disconnect().await.unwrap();
        assert_eq!(*seen.lock(), vec![ConnectionEventKind::Disconnect]);

        conn.retry_connect().await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionEventKind::Disconnect,
                ConnectionEventKind::Disconnect,
                ConnectionEventKind::Connect,
            ]
        );
    }

    #[tokio::test]
    async fn test_broken_link_drops_handle() {
        let conn = memory();
        conn.connect().await.unwrap();
        let seen = record_events(&conn);

        {
            let mut slot = conn.acquire().await.unwrap();
            let result: DbResult<()> = conn.settle(
                &mut slot,
                Err(DbError::database("no such table: t", None, "check the table")),
            );
            assert!(result.is_err());
            assert!(slot.is_some());
            assert!(conn.is_connected());

            let result: DbResult<()> =
                conn.settle(&mut slot, Err(DbError::transient("I/O error: broken pipe")));
            assert!(result.unwrap_err().is_transient());
            assert!(slot.is_none());
        }
        assert!(!conn.is_connected());
        assert_eq!(*seen.lock(), vec![ConnectionEventKind::Disconnect]);
        assert!(conn.last_error().contains("broken pipe"));

        // setters work again and the next statement reconnects
        conn.set_max_connect_attempts(3);
        assert_eq!(conn.max_connect_attempts(), 3);
        drop(conn.acquire().await.unwrap());
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let conn = memory();
        let id = conn.add_listener(Arc::new(|_: &ConnectionEvent| {}));
        assert_eq!(conn.listener_count(), 1);
        assert!(conn.remove_listener(id));
        assert!(!conn.remove_listener(id));
        assert_eq!(conn.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_setters_ignored_while_connected() {
        let conn = memory();
        conn.connect().await.unwrap();
        conn.set_url("sqlite:other.db");
        conn.set_user("someone");
        conn.set_auto_commit(false);
        conn.set_max_connect_attempts(5);
        assert_eq!(conn.url(), "sqlite::memory:");
        assert_eq!(conn.user(), "");
        assert!(conn.auto_commit());
        assert_eq!(conn.max_connect_attempts(), 1);

        conn.disconnect().await.unwrap();
        conn.set_max_connect_attempts(5);
        assert_eq!(conn.max_connect_attempts(), 5);
    }

    #[tokio::test]
    async fn test_manual_commit_mode() {
        let conn = memory();
        conn.set_auto_commit(false);
        conn.connect().await.unwrap();
        conn.commit().await.unwrap();
        conn.rollback().await.unwrap();
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_when_disconnected_fails() {
        let conn = memory();
        conn.set_auto_commit(false);
        assert!(matches!(
            conn.commit().await,
            Err(DbError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_summary_has_no_password() {
        let conn = Connection::new(
            ConnectionSettings::new("sqlite::memory:", "u", Password::new("hunter2")),
            Arc::new(SqlxDriver),
        );
        let summary = conn.summary();
        assert_eq!(summary.name, conn.short_url());
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!format!("{:?}", conn).contains("hunter2"));
    }
}
