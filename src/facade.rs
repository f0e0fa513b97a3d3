//! Per-connection facades over the active backend.
//!
//! A facade is created once per connection identity and forwards every call to
//! the capability object the [`BackendDispatcher`] builds for it. When the
//! dispatcher is reconfigured the facade rebuilds its delegate on the next
//! call, so callers never hold on to a stale backend. When the connection
//! disconnects the [`FacadeRegistry`] forgets its facades and the next lookup
//! builds fresh ones.

use crate::backend::{BackendDispatcher, LogCapability, LogTable, SqlCapability};
use crate::db::{Connection, Cursor, PreparedStatement};
use crate::error::DbResult;
use crate::table::TableRegistry;
use crate::models::{
    ConnectionEvent, ConnectionEventKind, ConnectionIdentity, LiveColumn, LogConditions, LogEntry,
    QueryParam, UpdateOutcome,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Delegate plus the dispatcher generation it was built for.
struct Bound<T: ?Sized> {
    generation: u64,
    delegate: Arc<T>,
}

/// Stable SQL capability for one connection.
pub struct SqlFacade {
    conn: Arc<Connection>,
    dispatcher: Arc<BackendDispatcher>,
    bound: RwLock<Bound<dyn SqlCapability>>,
}

impl std::fmt::Debug for SqlFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlFacade")
            .field("connection", &self.conn)
            .field("backend", &self.dispatcher.name())
            .finish()
    }
}

impl SqlFacade {
    pub fn new(conn: Arc<Connection>, dispatcher: Arc<BackendDispatcher>) -> DbResult<Self> {
        let generation = dispatcher.generation();
        let delegate = dispatcher.sql(Arc::clone(&conn))?;
        Ok(Self {
            conn,
            dispatcher,
            bound: RwLock::new(Bound {
                generation,
                delegate,
            }),
        })
    }

    /// The delegate for the current backend.
    pub fn delegate(&self) -> DbResult<Arc<dyn SqlCapability>> {
        let generation = self.dispatcher.generation();
        {
            let bound = self.bound.read();
            if bound.generation == generation {
                return Ok(Arc::clone(&bound.delegate));
            }
        }
        let delegate = self.dispatcher.sql(Arc::clone(&self.conn))?;
        debug!(backend = self.dispatcher.name(), url = %self.conn.masked_url(), "Rebound SQL facade");
        *self.bound.write() = Bound {
            generation,
            delegate: Arc::clone(&delegate),
        };
        Ok(delegate)
    }
}

#[async_trait]
impl SqlCapability for SqlFacade {
    fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    async fn execute(&self, sql: &str) -> DbResult<bool> {
        self.delegate()?.execute(sql).await
    }

    async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Cursor> {
        self.delegate()?.query(sql, params).await
    }

    async fn select(
        &self,
        columns: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Cursor> {
        self.delegate()?.select(columns, tables, condition).await
    }

    async fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Cursor> {
        self.delegate()?
            .select_distinct(columns, tables, condition)
            .await
    }

    async fn prepare(&self, sql: &str, return_keys: bool) -> DbResult<PreparedStatement> {
        self.delegate()?.prepare(sql, return_keys).await
    }

    async fn update(
        &self,
        set_clause: &str,
        table: &str,
        condition: Option<&str>,
    ) -> DbResult<u64> {
        self.delegate()?.update(set_clause, table, condition).await
    }

    async fn insert(&self, sql: &str, params: &[QueryParam]) -> DbResult<UpdateOutcome> {
        self.delegate()?.insert(sql, params).await
    }

    async fn truncate(&self, table: &str) -> DbResult<()> {
        self.delegate()?.truncate(table).await
    }

    async fn drop_table(&self, table: &str) -> DbResult<()> {
        self.delegate()?.drop_table(table).await
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        self.delegate()?.table_exists(table).await
    }

    async fn column_exists(&self, table: &str, column: &str) -> DbResult<bool> {
        self.delegate()?.column_exists(table, column).await
    }

    async fn columns(&self, table: &str) -> DbResult<Vec<LiveColumn>> {
        self.delegate()?.columns(table).await
    }

    async fn select_strings(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<String>> {
        self.delegate()?
            .select_strings(distinct, column, tables, condition)
            .await
    }

    async fn select_ints(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i32>> {
        self.delegate()?
            .select_ints(distinct, column, tables, condition)
            .await
    }

    async fn select_longs(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<i64>> {
        self.delegate()?
            .select_longs(distinct, column, tables, condition)
            .await
    }

    async fn select_doubles(
        &self,
        distinct: bool,
        column: &str,
        tables: &str,
        condition: Option<&str>,
    ) -> DbResult<Vec<f64>> {
        self.delegate()?
            .select_doubles(distinct, column, tables, condition)
            .await
    }
}

/// Stable log capability for one connection.
pub struct LogFacade {
    conn: Arc<Connection>,
    dispatcher: Arc<BackendDispatcher>,
    table: Arc<LogTable>,
    bound: RwLock<Bound<dyn LogCapability>>,
}

impl std::fmt::Debug for LogFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFacade")
            .field("connection", &self.conn)
            .field("backend", &self.dispatcher.name())
            .finish()
    }
}

impl LogFacade {
    pub fn new(
        conn: Arc<Connection>,
        dispatcher: Arc<BackendDispatcher>,
        table: Arc<LogTable>,
    ) -> DbResult<Self> {
        let generation = dispatcher.generation();
        let delegate = dispatcher.log(Arc::clone(&conn), Arc::clone(&table))?;
        Ok(Self {
            conn,
            dispatcher,
            table,
            bound: RwLock::new(Bound {
                generation,
                delegate,
            }),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn table(&self) -> &Arc<LogTable> {
        &self.table
    }

    pub fn delegate(&self) -> DbResult<Arc<dyn LogCapability>> {
        let generation = self.dispatcher.generation();
        {
            let bound = self.bound.read();
            if bound.generation == generation {
                return Ok(Arc::clone(&bound.delegate));
            }
        }
        let delegate = self
            .dispatcher
            .log(Arc::clone(&self.conn), Arc::clone(&self.table))?;
        debug!(backend = self.dispatcher.name(), url = %self.conn.masked_url(), "Rebound log facade");
        *self.bound.write() = Bound {
            generation,
            delegate: Arc::clone(&delegate),
        };
        Ok(delegate)
    }
}

#[async_trait]
impl LogCapability for LogFacade {
    async fn init(&self) -> DbResult<bool> {
        self.delegate()?.init().await
    }

    async fn load(&self, id: i64) -> DbResult<Option<LogEntry>> {
        self.delegate()?.load(id).await
    }

    async fn search(&self, conditions: &LogConditions) -> DbResult<Vec<LogEntry>> {
        self.delegate()?.search(conditions).await
    }

    async fn exists(&self, id: i64) -> DbResult<bool> {
        self.delegate()?.exists(id).await
    }

    async fn add(&self, entry: &LogEntry) -> DbResult<i64> {
        self.delegate()?.add(entry).await
    }

    async fn update(&self, entry: &LogEntry) -> DbResult<bool> {
        self.delegate()?.update(entry).await
    }

    async fn remove(&self, id: i64) -> DbResult<bool> {
        self.delegate()?.remove(id).await
    }
}

/// Identity-keyed facade singletons.
pub struct FacadeRegistry {
    dispatcher: Arc<BackendDispatcher>,
    tables: Arc<TableRegistry>,
    sql: Mutex<HashMap<ConnectionIdentity, Arc<SqlFacade>>>,
    log: Mutex<HashMap<ConnectionIdentity, Arc<LogFacade>>>,
    subscribed: Mutex<HashSet<Uuid>>,
}

impl std::fmt::Debug for FacadeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeRegistry")
            .field("backend", &self.dispatcher.name())
            .field("sql", &self.sql.lock().len())
            .field("log", &self.log.lock().len())
            .finish()
    }
}

impl FacadeRegistry {
    pub fn new(dispatcher: Arc<BackendDispatcher>, tables: Arc<TableRegistry>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            tables,
            sql: Mutex::new(HashMap::new()),
            log: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
        })
    }

    pub fn dispatcher(&self) -> &Arc<BackendDispatcher> {
        &self.dispatcher
    }

    /// The SQL facade of a connection, created on first use.
    pub fn sql(self: &Arc<Self>, conn: &Arc<Connection>) -> DbResult<Arc<SqlFacade>> {
        let identity = conn.identity();
        if let Some(facade) = self.sql.lock().get(&identity) {
            if facade.conn.id() == conn.id() {
                return Ok(Arc::clone(facade));
            }
        }

        let facade = Arc::new(SqlFacade::new(
            Arc::clone(conn),
            Arc::clone(&self.dispatcher),
        )?);
        self.subscribe(conn);
        let mut map = self.sql.lock();
        let slot = map.entry(identity).or_insert_with(|| Arc::clone(&facade));
        if slot.conn.id() != conn.id() {
            *slot = facade;
        }
        Ok(Arc::clone(slot))
    }

    /// The log facade of a connection, created on first use.
    pub fn log(self: &Arc<Self>, conn: &Arc<Connection>) -> DbResult<Arc<LogFacade>> {
        let identity = conn.identity();
        if let Some(facade) = self.log.lock().get(&identity) {
            if facade.conn.id() == conn.id() {
                return Ok(Arc::clone(facade));
            }
        }

        // The log table's schema manager is shared through the table registry
        // and speaks through the SQL facade, so it follows reconfiguration.
        let sql: Arc<dyn SqlCapability> = self.sql(conn)?;
        let table = self
            .tables
            .get_or_create(conn, || Ok(LogTable::new(sql)))?;
        let facade = Arc::new(LogFacade::new(
            Arc::clone(conn),
            Arc::clone(&self.dispatcher),
            table,
        )?);
        self.subscribe(conn);
        let mut map = self.log.lock();
        let slot = map.entry(identity).or_insert_with(|| Arc::clone(&facade));
        if slot.conn.id() != conn.id() {
            *slot = facade;
        }
        Ok(Arc::clone(slot))
    }

    pub fn has_sql(&self, identity: &ConnectionIdentity) -> bool {
        self.sql.lock().contains_key(identity)
    }

    pub fn has_log(&self, identity: &ConnectionIdentity) -> bool {
        self.log.lock().contains_key(identity)
    }

    fn subscribe(self: &Arc<Self>, conn: &Arc<Connection>) {
        if !self.subscribed.lock().insert(conn.id()) {
            return;
        }
        let registry: Weak<Self> = Arc::downgrade(self);
        conn.add_listener(Arc::new(move |event: &ConnectionEvent| {
            if event.kind != ConnectionEventKind::Disconnect {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.invalidate(event);
            }
        }));
    }

    fn invalidate(&self, event: &ConnectionEvent) {
        let sql = {
            let mut map = self.sql.lock();
            let before = map.len();
            map.retain(|_, f| f.conn.id() != event.connection_id);
            before - map.len()
        };
        let log = {
            let mut map = self.log.lock();
            let before = map.len();
            map.retain(|_, f| f.conn.id() != event.connection_id);
            before - map.len()
        };
        if sql + log > 0 {
            debug!(connection = %event.connection_id, sql = sql, log = log, "Dropped facades");
        }
    }
}
