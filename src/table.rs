//! Declarative table management.
//!
//! A [`SchemaManager`] owns the [`TableSpec`] of one table on one connection and
//! makes sure, once, that the physical table matches it: the table is created
//! when missing, checked column by column when present, and optionally
//! migrated by adding declared columns the live table lacks. DDL statements are
//! not wrapped in a transaction, so a failure half way through a creation
//! leaves the statements that already succeeded in place.
//!
//! [`TableRegistry`] caches one object per (table kind, connection identity)
//! and forgets a connection's objects when it disconnects.

use crate::backend::SqlCapability;
use crate::backend::dialect;
use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionEvent, ConnectionEventKind, ConnectionIdentity, DatabaseType, LiveColumn, TableSpec,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs after a table has been created, e.g. to insert seed rows.
#[async_trait]
pub trait PostCreateHook: Send + Sync {
    async fn table_created(&self, sql: &dyn SqlCapability, table: &str) -> DbResult<()>;
}

/// Creates, verifies and migrates one table.
pub struct SchemaManager {
    sql: Arc<dyn SqlCapability>,
    spec: TableSpec,
    add_missing: bool,
    hook: Option<Arc<dyn PostCreateHook>>,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("table", &self.spec.name)
            .field("add_missing", &self.add_missing)
            .finish_non_exhaustive()
    }
}

impl SchemaManager {
    pub fn new(sql: Arc<dyn SqlCapability>, spec: TableSpec) -> Self {
        Self {
            sql,
            spec,
            add_missing: false,
            hook: None,
        }
    }

    /// Add declared columns missing from an existing table instead of failing.
    pub fn add_missing_columns(mut self, enabled: bool) -> Self {
        self.add_missing = enabled;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostCreateHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn table(&self) -> &str {
        &self.spec.name
    }

    pub fn sql(&self) -> &Arc<dyn SqlCapability> {
        &self.sql
    }

    /// Make sure the table exists and conforms to its specification.
    ///
    /// Returns `true` once the table conforms. Mismatches are reported as
    /// [`DbError::SchemaMismatch`], failed statements as [`DbError::DdlFailure`].
    pub async fn init(&self) -> DbResult<bool> {
        self.spec
            .validate()
            .map_err(|msg| DbError::schema_mismatch(msg, &self.spec.name))?;

        if self.sql.table_exists(&self.spec.name).await? {
            self.verify().await?;
        } else {
            self.create().await?;
        }
        Ok(true)
    }

    /// Compare the live columns against the specification, adding missing ones
    /// when enabled.
    async fn verify(&self) -> DbResult<()> {
        let table = &self.spec.name;
        let live = self.sql.columns(table).await?;

        for column in &live {
            match self.spec.column_type(&column.name) {
                Some(declared) if !declared.is_compatible(&column.type_name, column.size) => {
                    return Err(DbError::schema_mismatch(
                        format!(
                            "column '{}' has type {} but {:?}{} is declared",
                            column.name,
                            column.type_name,
                            declared.sql_type,
                            declared
                                .size
                                .filter(|_| declared.sql_type.is_sized())
                                .map(|s| format!("({})", s))
                                .unwrap_or_default()
                        ),
                        table,
                    ));
                }
                Some(_) => {}
                // Extra live columns are left to the final count check in
                // add-missing mode.
                None if !self.add_missing => {
                    return Err(DbError::schema_mismatch(
                        format!("column '{}' is not declared", column.name),
                        table,
                    ));
                }
                None => warn!(table = %table, column = %column.name, "Undeclared column"),
            }
        }

        let missing: Vec<_> = self
            .spec
            .columns
            .iter()
            .filter(|(name, _)| !has_column(&live, name))
            .collect();
        if missing.is_empty() && live.len() == self.spec.columns.len() {
            debug!(table = %table, "Table conforms");
            return Ok(());
        }
        if !self.add_missing {
            let names: Vec<&str> = missing.iter().map(|(n, _)| n.as_str()).collect();
            return Err(DbError::schema_mismatch(
                format!("missing columns: {}", names.join(", ")),
                table,
            ));
        }

        let db = self.dialect()?;
        for (name, column) in missing {
            let ddl = dialect::add_column_sql(db, table, name, column);
            self.run_ddl(&ddl).await?;
            info!(table = %table, column = %name, "Added missing column");
        }

        let live = self.sql.columns(table).await?;
        if live.len() != self.spec.columns.len() {
            return Err(DbError::schema_mismatch(
                format!(
                    "table has {} columns after migration, {} declared",
                    live.len(),
                    self.spec.columns.len()
                ),
                table,
            ));
        }
        Ok(())
    }

    async fn create(&self) -> DbResult<()> {
        let db = self.dialect()?;
        let table = &self.spec.name;

        self.run_ddl(&dialect::create_table_sql(db, &self.spec)).await?;
        for (n, index) in self.spec.indices.iter().enumerate() {
            self.run_ddl(&dialect::create_index_sql(db, table, n, index))
                .await?;
        }
        info!(
            table = %table,
            columns = self.spec.columns.len(),
            indices = self.spec.indices.len(),
            "Created table"
        );

        if let Some(hook) = &self.hook {
            hook.table_created(self.sql.as_ref(), table).await?;
        }
        Ok(())
    }

    async fn run_ddl(&self, ddl: &str) -> DbResult<()> {
        if let Err(e) = self.sql.execute(ddl).await {
            error!(table = %self.spec.name, sql = %ddl, error = %e, "DDL statement failed");
            return Err(DbError::ddl_failure(
                format!("{}: {}", ddl, e),
                &self.spec.name,
            ));
        }
        Ok(())
    }

    fn dialect(&self) -> DbResult<DatabaseType> {
        self.sql.connection().database_type().ok_or_else(|| {
            DbError::invalid_input(format!(
                "Unsupported connection URL: {}",
                self.sql.connection().masked_url()
            ))
        })
    }
}

fn has_column(live: &[LiveColumn], name: &str) -> bool {
    live.iter().any(|c| c.name.eq_ignore_ascii_case(name))
}

type TableKey = (TypeId, ConnectionIdentity);

struct TableSlot {
    connection_id: Uuid,
    value: Arc<dyn Any + Send + Sync>,
}

/// One cached object per (table kind, connection identity).
#[derive(Default)]
pub struct TableRegistry {
    tables: Mutex<HashMap<TableKey, TableSlot>>,
    subscribed: Mutex<HashSet<Uuid>>,
}

impl std::fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRegistry")
            .field("tables", &self.len())
            .finish()
    }
}

impl TableRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The cached `T` for the connection, created with `create` on first use.
    ///
    /// `create` is not called while the registry lock is held; if two callers
    /// race, the first stored value wins.
    pub fn get_or_create<T, F>(self: &Arc<Self>, conn: &Arc<Connection>, create: F) -> DbResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> DbResult<T>,
    {
        let key = (TypeId::of::<T>(), conn.identity());
        let cached = self
            .tables
            .lock()
            .get(&key)
            .filter(|slot| slot.connection_id == conn.id())
            .map(|slot| Arc::clone(&slot.value));
        if let Some(existing) = cached.and_then(|v| v.downcast::<T>().ok()) {
            return Ok(existing);
        }

        let created: Arc<dyn Any + Send + Sync> = Arc::new(create()?);
        self.subscribe(conn);
        let value = {
            let mut tables = self.tables.lock();
            let slot = tables.entry(key).or_insert_with(|| TableSlot {
                connection_id: conn.id(),
                value: Arc::clone(&created),
            });
            if slot.connection_id != conn.id() {
                *slot = TableSlot {
                    connection_id: conn.id(),
                    value: created,
                };
            }
            Arc::clone(&slot.value)
        };
        value
            .downcast::<T>()
            .map_err(|_| DbError::internal("table registry holds a value of the wrong type"))
    }

    pub fn get<T: Any + Send + Sync>(&self, identity: &ConnectionIdentity) -> Option<Arc<T>> {
        self.lookup(&(TypeId::of::<T>(), identity.clone()))
    }

    fn lookup<T: Any + Send + Sync>(&self, key: &TableKey) -> Option<Arc<T>> {
        let value = Arc::clone(&self.tables.lock().get(key)?.value);
        value.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
        let mut tables = self.tables.lock();
        let before = tables.len();
        // Matched by instance: the identity key may predate a settings change
        tables.retain(|_, slot| slot.connection_id != event.connection_id);
        let removed = before - tables.len();
        if removed > 0 {
            debug!(connection = %event.connection_id, removed = removed, "Dropped cached tables");
        }
    }
}
