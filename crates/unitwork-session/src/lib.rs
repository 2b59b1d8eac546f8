//! Session and Unit of Work for unitwork.
//!
//! `unitwork-session` is the **unit-of-work layer**. A [`Session`] owns one
//! connection and coordinates object identity, dirty checking and deferred
//! writes over it.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one shared instance per primary key per session.
//! - **Dirty checking**: cached entities are diffed against their load-time
//!   snapshot at flush; only changed columns are written.
//! - **Deferred writes**: `save`, `delete` and `update` queue actions that run
//!   at flush in insert, update, delete order.
//! - **Transactions**: `begin`/`commit`/`rollback` drive a small state machine
//!   bound to the session's connection.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::builder(SqliteConfig::memory())
//!     .register::<Product>()
//!     .build()?;
//!
//! factory.run_within_tx(|session| {
//!     let product = session.find::<Product>(1)?.expect("product 1");
//!     product.write().unwrap().price = 2.0;
//!     Ok(())
//! })?;
//! ```

pub mod action;
pub mod context;
pub mod factory;
pub mod key;
pub mod persister;
pub mod registry;
pub mod transaction;

pub use action::{Action, ActionKind, ActionQueue, PendingActions, UpdateOrigin};
pub use context::{AnyEntity, ColumnValues, DirtyEntity, EntityRef, PersistenceContext};
pub use factory::{SessionFactory, SessionFactoryBuilder};
pub use key::EntityKey;
pub use persister::Persister;
pub use registry::{EntityDescriptor, EntityRegistry};
pub use transaction::{Transaction, TransactionStatus};

use std::fmt;
use std::sync::{Arc, RwLock};
use unitwork_core::entity::unknown_column;
use unitwork_core::{Connection, Entity, Error, Result, Value};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush pending work before releasing the connection in `close`.
    pub flush_on_close: bool,
    /// Flush pending work before committing.
    pub flush_on_commit: bool,
    /// Evict every cached entity after a rollback.
    pub clear_on_rollback: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_on_close: true,
            flush_on_commit: true,
            clear_on_rollback: true,
        }
    }
}

fn closed() -> Error {
    Error::illegal_state("Session is already closed")
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work over a single connection.
///
/// A session is driven from one thread at a time. Independent sessions,
/// each with their own connection, may run concurrently.
///
/// Entities come back as [`EntityRef`] handles (`Arc<RwLock<E>>`). Guards
/// taken on a handle must be released before calling back into the session:
/// the session never waits on an entity lock and reports a held one as an
/// illegal-state error instead.
pub struct Session<C: Connection> {
    /// `None` once the session is closed.
    connection: Option<C>,
    registry: Arc<EntityRegistry>,
    config: SessionConfig,
    context: PersistenceContext,
    actions: ActionQueue,
    transaction: Option<Transaction>,
}

impl<C: Connection> Session<C> {
    /// Open a session over `connection` with the default configuration.
    pub fn new(connection: C, registry: Arc<EntityRegistry>) -> Self {
        Self::with_config(connection, registry, SessionConfig::default())
    }

    /// Open a session with a custom configuration.
    pub fn with_config(connection: C, registry: Arc<EntityRegistry>, config: SessionConfig) -> Self {
        Self {
            connection: Some(connection),
            registry,
            config,
            context: PersistenceContext::new(),
            actions: ActionQueue::new(),
            transaction: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.connection.is_some() {
            Ok(())
        } else {
            Err(closed())
        }
    }

    /// Borrow the underlying connection, e.g. to run DDL.
    pub fn connection_mut(&mut self) -> Result<&mut C> {
        self.connection.as_mut().ok_or_else(closed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load an entity by primary key.
    ///
    /// A cached instance is returned without touching storage. Otherwise the
    /// row is selected by id and, if present, cached and snapshotted.
    #[tracing::instrument(level = "debug", skip(self, id), fields(entity = E::ENTITY_NAME))]
    pub fn find<E: Entity>(&mut self, id: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        self.ensure_open()?;
        let id = id.into();
        if id.is_null() {
            return Err(Error::null_argument("primaryKey"));
        }
        let descriptor = self.registry.descriptor::<E>()?;
        let key = descriptor.key(id)?;

        if let Some(cached) = self.context.get::<E>(&key) {
            tracing::debug!(key = %key, "Found in persistence context");
            return Ok(Some(cached));
        }

        let param = descriptor.to_storage(descriptor.id_column(), key.id().clone())?;
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let sql = persister::select_by_id_sql(&descriptor, conn.dialect());
        let mut found = Persister::new(conn).select::<E>(&descriptor, &sql, &[param])?;
        if found.len() > 1 {
            return Err(Error::Consistency("More than 1 result were found!".to_string()));
        }
        let Some(entity) = found.pop() else {
            tracing::debug!(key = %key, "No row found");
            return Ok(None);
        };

        let handle: EntityRef<E> = Arc::new(RwLock::new(entity));
        self.context.put(key.clone(), handle.clone());
        self.context.put_snapshot(key.clone(), &*handle)?;
        tracing::debug!(key = %key, "Loaded from database");
        Ok(Some(handle))
    }

    /// Load one page of rows.
    ///
    /// Results are detached values: the persistence context is neither
    /// consulted nor populated.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = E::ENTITY_NAME))]
    pub fn find_all<E: Entity>(&mut self, limit: i64, offset: i64) -> Result<Vec<E>> {
        self.ensure_open()?;
        if limit < 0 {
            return Err(Error::invalid_argument(
                "[limit] argument cannot be negative number",
            ));
        }
        if offset < 0 {
            return Err(Error::invalid_argument(
                "[offset] argument cannot be negative number",
            ));
        }
        let descriptor = self.registry.descriptor::<E>()?;
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let dialect = conn.dialect();
        let sql = persister::select_page_sql(&descriptor, dialect, limit, offset);
        let params = dialect.page_params(limit, offset);
        let found = Persister::new(conn).select::<E>(&descriptor, &sql, &params)?;
        tracing::debug!(count = found.len(), "Loaded page");
        Ok(found)
    }

    /// Load every row whose columns equal the given values.
    ///
    /// Filters are combined with AND in column-name order. Like
    /// [`find_all`](Self::find_all), results are detached.
    #[tracing::instrument(level = "debug", skip(self, properties), fields(entity = E::ENTITY_NAME))]
    pub fn find_all_by<E, I, K, V>(&mut self, properties: I) -> Result<Vec<E>>
    where
        E: Entity,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let filters = column_values::<E, _, _, _>(&descriptor, properties)?;
        if filters.is_empty() {
            return Err(Error::invalid_argument(
                "[properties] argument must not be empty",
            ));
        }

        let columns: Vec<&str> = filters.iter().map(|(c, _)| *c).collect();
        let params = filters
            .into_iter()
            .map(|(c, v)| descriptor.to_storage(c, v))
            .collect::<Result<Vec<_>>>()?;
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let sql = persister::select_by_columns_sql(&descriptor, conn.dialect(), &columns);
        let found = Persister::new(conn).select::<E>(&descriptor, &sql, &params)?;
        tracing::debug!(count = found.len(), columns = ?columns, "Loaded by columns");
        Ok(found)
    }

    /// Whether an entity with the same id is cached.
    pub fn contains<E: Entity>(&self, entity: &E) -> Result<bool> {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let id = entity.id_value();
        if id.is_null() {
            return Ok(false);
        }
        Ok(self.context.contains(&descriptor.key(id)?))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Queue an insert and hand back the handle the session will manage.
    ///
    /// Nothing reaches storage until flush. A generated id left unset is
    /// assigned from the database and written onto the handle at that point.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::ENTITY_NAME))]
    pub fn save<E: Entity>(&mut self, entity: E) -> Result<EntityRef<E>> {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let id = entity.id_value();
        if id.is_null() {
            if !descriptor.id_field().generated {
                return Err(Error::null_argument(descriptor.id_column()));
            }
        } else {
            descriptor.key(id)?;
        }

        let handle: EntityRef<E> = Arc::new(RwLock::new(entity));
        let erased: Arc<dyn AnyEntity> = handle.clone();
        self.actions.push(Action::Insert {
            entity: erased,
            descriptor,
        });
        tracing::debug!("Queued insert");
        Ok(handle)
    }

    /// Queue a delete for a cached entity.
    ///
    /// The entity stays cached until the delete runs at flush.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::ENTITY_NAME))]
    pub fn delete<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let key = descriptor.key(entity.id_value())?;
        if !self.context.contains(&key) {
            return Err(Error::illegal_state(format!(
                "Cannot delete {}: entity is not managed by this session",
                key
            )));
        }
        tracing::debug!(key = %key, "Queued delete");
        self.actions.push(Action::Delete { key, descriptor });
        Ok(())
    }

    /// Queue an update of exactly `columns` for the row with `entity`'s id.
    ///
    /// The values are written as given; `entity` itself is not modified. A
    /// cached instance with the same id is evicted once the update runs, so
    /// the next `find` reads the stored row.
    #[tracing::instrument(level = "debug", skip(self, entity, columns), fields(entity = E::ENTITY_NAME))]
    pub fn update<E, I, K, V>(&mut self, entity: &E, columns: I) -> Result<()>
    where
        E: Entity,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let key = descriptor.key(entity.id_value())?;
        let columns = column_values::<E, _, _, _>(&descriptor, columns)?;
        if columns.is_empty() {
            return Err(Error::invalid_argument(
                "[updatedColumns] argument must not be empty",
            ));
        }
        if columns.iter().any(|(c, _)| *c == descriptor.id_column()) {
            return Err(Error::invalid_argument(format!(
                "Cannot update id column '{}' of {}",
                descriptor.id_column(),
                E::ENTITY_NAME
            )));
        }
        tracing::debug!(key = %key, columns = columns.len(), "Queued update");
        self.actions.push(Action::Update {
            key,
            descriptor,
            columns,
            origin: UpdateOrigin::Explicit,
        });
        Ok(())
    }

    /// Copy `entity`'s non-id columns onto the managed instance with the same id.
    ///
    /// The managed instance is loaded first if it is not cached. The argument
    /// is left untouched; the returned handle is the managed instance.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::ENTITY_NAME))]
    pub fn merge<E: Entity>(&mut self, entity: &E) -> Result<EntityRef<E>> {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let key = descriptor.key(entity.id_value())?;

        let target = match self.context.get::<E>(&key) {
            Some(cached) => cached,
            None => self.find::<E>(key.id().clone())?.ok_or_else(|| {
                Error::illegal_state(format!("Cannot merge {}: no such row", key))
            })?,
        };

        let id_column = descriptor.id_column();
        for (column, value) in entity.to_row() {
            if column != id_column {
                AnyEntity::set_column(&*target, column, value)?;
            }
        }
        tracing::debug!(key = %key, "Merged");
        Ok(target)
    }

    /// Evict an entity from the persistence context.
    ///
    /// Returns whether it was cached. Pending actions already queued for it
    /// still run.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::ENTITY_NAME))]
    pub fn detach<E: Entity>(&mut self, entity: &E) -> Result<bool> {
        self.ensure_open()?;
        let descriptor = self.registry.descriptor::<E>()?;
        let key = descriptor.key(entity.id_value())?;
        let evicted = self.context.evict(&key);
        tracing::debug!(key = %key, evicted, "Detached");
        Ok(evicted)
    }

    /// Queue updates for dirty entities, then run every pending action.
    ///
    /// Actions run inserts first, then updates, then deletes. The first
    /// failure stops the flush; actions that already ran are left to the
    /// surrounding transaction. Dirty-check updates that did not run are
    /// dropped, since the next flush finds them again.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;

        // Every dirty entity is checked before any update is queued, so a
        // rejected flush leaves the queue as it was.
        let mut dirty = self.context.changed_columns()?;
        dirty.sort_by_cached_key(|d| d.key.to_string());
        let mut updates = Vec::with_capacity(dirty.len());
        for DirtyEntity { key, changes, .. } in dirty {
            let descriptor = self.registry.get(key.type_id()).ok_or_else(|| {
                Error::Consistency(format!("{} is cached but not registered", key.entity_name()))
            })?;
            if changes.iter().any(|(c, _)| *c == descriptor.id_column()) {
                return Err(Error::illegal_state(format!(
                    "Cannot change the id of managed {}",
                    key
                )));
            }
            updates.push(Action::Update {
                key,
                descriptor,
                columns: changes,
                origin: UpdateOrigin::DirtyCheck,
            });
        }
        for update in updates {
            self.actions.push(update);
        }

        let pending = self.actions.pending();
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let executed = self.actions.drain(conn, &mut self.context)?;
        tracing::debug!(
            executed,
            inserts = pending.inserts,
            updates = pending.updates,
            deletes = pending.deletes,
            "Flushed"
        );
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction.
    ///
    /// An existing transaction that has not finished is reused; beginning it
    /// again fails while it is active.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self
            .transaction
            .as_ref()
            .is_none_or(|tx| tx.status().is_terminal())
        {
            self.transaction = Some(Transaction::new());
        }
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let tx = self.transaction.get_or_insert_with(Transaction::new);
        tx.begin(conn)
    }

    /// Flush (unless disabled) and commit the active transaction.
    ///
    /// A flush failure leaves the transaction in `FailedCommit`, ready for a
    /// rollback.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.transaction_status() != Some(TransactionStatus::Active) {
            return Err(Error::illegal_state("Cannot commit not active transaction"));
        }
        if self.config.flush_on_commit {
            if let Err(e) = self.flush() {
                if let Some(tx) = self.transaction.as_mut() {
                    tx.mark_failed_commit();
                }
                tracing::error!(error = %e, "Flush before commit failed");
                return Err(e);
            }
        }
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        match self.transaction.as_mut() {
            Some(tx) => tx.commit(conn),
            None => Err(Error::illegal_state("Cannot commit not active transaction")),
        }
    }

    /// Roll back the current transaction and discard pending actions.
    ///
    /// With `clear_on_rollback` every cached entity is evicted too, so later
    /// reads see storage again.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let conn = self.connection.as_mut().ok_or_else(closed)?;
        let Some(tx) = self.transaction.as_mut() else {
            return Err(Error::illegal_state(format!(
                "Cannot rollback transaction with status {}",
                TransactionStatus::NotActive
            )));
        };
        let result = tx.rollback(conn);
        if matches!(&result, Err(e) if e.is_illegal_state()) {
            return result;
        }

        let discarded = self.actions.len();
        self.actions.clear();
        if self.config.clear_on_rollback {
            self.context.clear();
        }
        tracing::debug!(discarded, "Discarded pending actions");
        result
    }

    /// Status of the session's transaction, if one was ever begun.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction.as_ref().map(Transaction::status)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Flush (unless disabled), release the connection and mark the session
    /// closed.
    ///
    /// The connection is released even when the flush fails; the flush error
    /// is returned in that case. Closing an already closed session is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<()> {
        if self.connection.is_none() {
            return Ok(());
        }
        let flushed = if self.config.flush_on_close {
            self.flush()
        } else {
            Ok(())
        };
        self.context.clear();
        self.actions.clear();

        let Some(conn) = self.connection.take() else {
            return flushed;
        };
        let released = conn.close();
        if let Err(e) = &released {
            tracing::warn!(error = %e, "Failed to release connection");
        }
        tracing::info!("Session closed");
        flushed.and(released)
    }

    /// Evict every cached entity and drop pending actions.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.context.clear();
        self.actions.clear();
        tracing::debug!("Cleared session");
        Ok(())
    }

    pub fn pending_actions(&self) -> PendingActions {
        self.actions.pending()
    }

    /// Number of entities in the persistence context.
    pub fn cached_entities(&self) -> usize {
        self.context.len()
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("cached", &self.context.len())
            .field("pending", &self.actions.pending())
            .field("transaction", &self.transaction_status())
            .field("config", &self.config)
            .finish()
    }
}

/// Resolve caller-supplied column names against `E`'s mapping.
///
/// Later duplicates win. The result is sorted by column name.
fn column_values<E, I, K, V>(descriptor: &EntityDescriptor, values: I) -> Result<ColumnValues>
where
    E: Entity,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Value>,
{
    let mut resolved: ColumnValues = Vec::new();
    for (column, value) in values {
        let column = column.as_ref();
        let field = descriptor
            .field(column)
            .ok_or_else(|| unknown_column::<E>(column))?;
        let value = value.into();
        match resolved.iter_mut().find(|(c, _)| *c == field.column_name) {
            Some(slot) => slot.1 = value,
            None => resolved.push((field.column_name, value)),
        }
    }
    resolved.sort_by(|a, b| a.0.cmp(b.0));
    Ok(resolved)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use unitwork_core::error::{QueryError, QueryErrorKind};
    use unitwork_core::{Row, SqlDialect};

    // ========================================================================
    // Recording connection
    // ========================================================================

    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        /// Transaction boundaries and close, in order.
        pub log: Vec<&'static str>,
        /// Writes: (sql, params).
        pub executed: Vec<(String, Vec<Value>)>,
        /// Reads: (sql, params).
        pub queries: Vec<(String, Vec<Value>)>,
        /// Result sets handed out by successive queries.
        pub rows: VecDeque<Vec<Row>>,
        pub next_id: i64,
        pub fail_commit: bool,
        pub fail_rollback: bool,
        pub fail_execute: bool,
        pub in_tx: bool,
        pub closed: bool,
    }

    pub(crate) struct MockConnection {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        pub(crate) fn new() -> (Self, Arc<Mutex<MockState>>) {
            let state = Arc::new(Mutex::new(MockState::default()));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }
    }

    fn storage_error(sql: Option<&str>, message: &str) -> Error {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: sql.map(str::to_string),
            message: message.to_string(),
            source: None,
        })
    }

    impl Connection for MockConnection {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }

        fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            let mut state = self.state.lock().unwrap();
            state.queries.push((sql.to_string(), params.to_vec()));
            Ok(state.rows.pop_front().unwrap_or_default())
        }

        fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            if state.fail_execute {
                return Err(storage_error(Some(sql), "execute failed"));
            }
            state.executed.push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
            let mut state = self.state.lock().unwrap();
            if state.fail_execute {
                return Err(storage_error(Some(sql), "insert failed"));
            }
            state.executed.push((sql.to_string(), params.to_vec()));
            state.next_id += 1;
            Ok(state.next_id)
        }

        fn begin(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.log.push("BEGIN");
            state.in_tx = true;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_commit {
                return Err(storage_error(None, "commit failed"));
            }
            state.log.push("COMMIT");
            state.in_tx = false;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_rollback {
                return Err(storage_error(None, "rollback failed"));
            }
            state.log.push("ROLLBACK");
            state.in_tx = false;
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            self.state.lock().unwrap().in_tx
        }

        fn close(self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.log.push("CLOSE");
            state.closed = true;
            Ok(())
        }
    }

    // ========================================================================
    // Fixtures
    // ========================================================================

    #[derive(Debug, Clone, PartialEq, unitwork_macros::Entity)]
    #[entity(table = "products")]
    pub(crate) struct Product {
        #[entity(id, generated)]
        pub id: Option<i64>,
        pub name: String,
        pub price: f64,
    }

    #[derive(Debug, Clone, PartialEq, unitwork_macros::Entity)]
    struct Unregistered {
        #[entity(id)]
        id: i64,
    }

    fn product(id: i64, name: &str, price: f64) -> Product {
        Product {
            id: Some(id),
            name: name.to_string(),
            price,
        }
    }

    fn product_row(id: i64, name: &str, price: f64) -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "price".into()],
            vec![
                Value::BigInt(id),
                Value::Text(name.into()),
                Value::Double(price),
            ],
        )
    }

    fn session() -> (Session<MockConnection>, Arc<Mutex<MockState>>) {
        let mut registry = EntityRegistry::new();
        registry.register::<Product>().unwrap();
        let (conn, state) = MockConnection::new();
        (Session::new(conn, Arc::new(registry)), state)
    }

    /// Session with product 1 ("scissors", 1.0) already loaded.
    fn loaded() -> (
        Session<MockConnection>,
        Arc<Mutex<MockState>>,
        EntityRef<Product>,
    ) {
        let (mut session, state) = session();
        state
            .lock()
            .unwrap()
            .rows
            .push_back(vec![product_row(1, "scissors", 1.0)]);
        let handle = session.find::<Product>(1).unwrap().unwrap();
        (session, state, handle)
    }

    fn executed_sql(state: &Arc<Mutex<MockState>>) -> Vec<String> {
        state
            .lock()
            .unwrap()
            .executed
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.flush_on_close);
        assert!(config.flush_on_commit);
        assert!(config.clear_on_rollback);
    }

    #[test]
    fn test_find_twice_returns_same_instance() {
        let (mut session, state, first) = loaded();
        let second = session.find::<Product>(1).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.lock().unwrap().queries.len(), 1);
        assert_eq!(
            state.lock().unwrap().queries[0],
            (
                "SELECT * FROM products WHERE id = ?".to_string(),
                vec![Value::BigInt(1)]
            )
        );
    }

    #[test]
    fn test_find_missing_row() {
        let (mut session, _state) = session();
        assert!(session.find::<Product>(42).unwrap().is_none());
        assert_eq!(session.cached_entities(), 0);
    }

    #[test]
    fn test_find_more_than_one_row_is_consistency_error() {
        let (mut session, state) = session();
        state.lock().unwrap().rows.push_back(vec![
            product_row(1, "a", 1.0),
            product_row(1, "b", 2.0),
        ]);
        let err = session.find::<Product>(1).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(err.to_string(), "Consistency error: More than 1 result were found!");
    }

    #[test]
    fn test_find_argument_errors() {
        let (mut session, _state) = session();
        let err = session.find::<Product>(Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "[primaryKey] argument must be not null");

        let err = session.find::<Product>("1").unwrap_err();
        assert!(err.is_invalid_argument());

        let err = session.find::<Unregistered>(1).unwrap_err();
        assert!(err.is_mapping());
        assert_eq!(
            err.to_string(),
            "Mapping error: Unregistered is not defined as entity"
        );
    }

    #[test]
    fn test_find_all_pages_without_caching() {
        let (mut session, state) = session();
        state.lock().unwrap().rows.push_back(vec![
            product_row(1, "a", 1.0),
            product_row(2, "b", 2.0),
        ]);
        let page = session.find_all::<Product>(2, 4).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].name, "b");
        assert_eq!(session.cached_entities(), 0);
        assert_eq!(
            state.lock().unwrap().queries[0],
            (
                "SELECT * FROM products LIMIT ? OFFSET ?".to_string(),
                vec![Value::BigInt(2), Value::BigInt(4)]
            )
        );
    }

    #[test]
    fn test_find_all_rejects_negative_bounds() {
        let (mut session, _state) = session();
        let err = session.find_all::<Product>(-1, 0).unwrap_err();
        assert_eq!(err.to_string(), "[limit] argument cannot be negative number");
        let err = session.find_all::<Product>(1, -1).unwrap_err();
        assert_eq!(err.to_string(), "[offset] argument cannot be negative number");
    }

    #[test]
    fn test_find_all_by_sorts_columns() {
        let (mut session, state) = session();
        state
            .lock()
            .unwrap()
            .rows
            .push_back(vec![product_row(3, "glue", 4.5)]);
        let found = session
            .find_all_by::<Product, _, _, _>([("price", Value::Double(4.5)), ("name", "glue".into())])
            .unwrap();
        assert_eq!(found, vec![product(3, "glue", 4.5)]);
        assert_eq!(
            state.lock().unwrap().queries[0],
            (
                "SELECT * FROM products WHERE name = ? AND price = ?".to_string(),
                vec![Value::Text("glue".into()), Value::Double(4.5)]
            )
        );

        let err = session
            .find_all_by::<Product, _, _, _>([("colour", Value::Null)])
            .unwrap_err();
        assert!(err.is_mapping());
        let err = session
            .find_all_by::<Product, Vec<(&str, Value)>, _, _>(Vec::new())
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    // ========================================================================
    // Dirty checking and flush
    // ========================================================================

    #[test]
    fn test_unmodified_entity_flushes_nothing() {
        let (mut session, state, _handle) = loaded();
        session.flush().unwrap();
        assert!(state.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_flush_writes_only_changed_column() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 2.0;
        session.flush().unwrap();
        assert_eq!(
            state.lock().unwrap().executed,
            vec![(
                "UPDATE products SET price = ? WHERE id = ?".to_string(),
                vec![Value::Double(2.0), Value::BigInt(1)]
            )]
        );
    }

    #[test]
    fn test_flush_is_idempotent() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().name = "shears".into();
        session.flush().unwrap();
        session.flush().unwrap();
        assert_eq!(state.lock().unwrap().executed.len(), 1);
    }

    #[test]
    fn test_flush_reads_through_read_guard() {
        let (mut session, _state, handle) = loaded();
        let _guard = handle.read().unwrap();
        session.flush().unwrap();
    }

    #[test]
    fn test_flush_with_held_write_guard_is_illegal() {
        let (mut session, _state, handle) = loaded();
        let _guard = handle.write().unwrap();
        assert!(session.flush().unwrap_err().is_illegal_state());
    }

    #[test]
    fn test_flush_rejects_changed_id() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().id = Some(9);
        let err = session.flush().unwrap_err();
        assert!(err.is_illegal_state());
        assert!(state.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_insert_runs_before_delete() {
        let (mut session, state, handle) = loaded();
        state.lock().unwrap().next_id = 10;
        let snapshot = handle.read().unwrap().clone();
        session.delete(&snapshot).unwrap();
        session
            .save(Product {
                id: None,
                name: "tape".into(),
                price: 0.5,
            })
            .unwrap();
        session.flush().unwrap();
        assert_eq!(
            executed_sql(&state),
            vec![
                "INSERT INTO products (name, price) VALUES (?, ?)",
                "DELETE FROM products WHERE id = ?",
            ]
        );
    }

    #[test]
    fn test_save_then_contains_only_after_flush() {
        let (mut session, state) = session();
        let handle = session
            .save(Product {
                id: None,
                name: "tape".into(),
                price: 0.5,
            })
            .unwrap();
        assert!(!session.contains(&*handle.read().unwrap()).unwrap());
        assert_eq!(session.pending_actions().inserts, 1);

        session.flush().unwrap();
        let saved = handle.read().unwrap().clone();
        assert_eq!(saved.id, Some(1));
        assert!(session.contains(&saved).unwrap());
        assert_eq!(
            state.lock().unwrap().executed[0].1,
            vec![Value::Text("tape".into()), Value::Double(0.5)]
        );

        let found = session.find::<Product>(1).unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &handle));
        assert!(state.lock().unwrap().queries.is_empty());
    }

    #[test]
    fn test_save_with_explicit_id_binds_it() {
        let (mut session, state) = session();
        session.save(product(7, "pins", 0.1)).unwrap();
        session.flush().unwrap();
        assert_eq!(
            state.lock().unwrap().executed[0],
            (
                "INSERT INTO products (id, name, price) VALUES (?, ?, ?)".to_string(),
                vec![
                    Value::BigInt(7),
                    Value::Text("pins".into()),
                    Value::Double(0.1)
                ]
            )
        );
        assert!(session.contains(&product(7, "pins", 0.1)).unwrap());
    }

    #[test]
    fn test_delete_then_contains_until_flush() {
        let (mut session, state, handle) = loaded();
        let entity = handle.read().unwrap().clone();
        session.delete(&entity).unwrap();
        assert!(session.contains(&entity).unwrap());

        session.flush().unwrap();
        assert!(!session.contains(&entity).unwrap());
        assert_eq!(
            state.lock().unwrap().executed,
            vec![(
                "DELETE FROM products WHERE id = ?".to_string(),
                vec![Value::BigInt(1)]
            )]
        );
    }

    #[test]
    fn test_delete_of_unmanaged_entity_is_illegal() {
        let (mut session, _state) = session();
        let err = session.delete(&product(5, "x", 1.0)).unwrap_err();
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_detach_then_find_reloads() {
        let (mut session, state, first) = loaded();
        let entity = first.read().unwrap().clone();
        assert!(session.detach(&entity).unwrap());
        assert!(!session.detach(&entity).unwrap());
        assert!(!session.contains(&entity).unwrap());

        state
            .lock()
            .unwrap()
            .rows
            .push_back(vec![product_row(1, "scissors", 1.0)]);
        let second = session.find::<Product>(1).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_detached_changes_are_not_flushed() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 3.0;
        let entity = handle.read().unwrap().clone();
        session.detach(&entity).unwrap();
        session.flush().unwrap();
        assert!(state.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_merge_copies_onto_cached_instance() {
        let (mut session, state, handle) = loaded();
        let incoming = product(1, "shears", 3.0);
        let merged = session.merge(&incoming).unwrap();
        assert!(Arc::ptr_eq(&merged, &handle));
        assert_eq!(*handle.read().unwrap(), product(1, "shears", 3.0));
        assert_eq!(incoming, product(1, "shears", 3.0));

        session.flush().unwrap();
        assert_eq!(
            state.lock().unwrap().executed,
            vec![(
                "UPDATE products SET name = ?, price = ? WHERE id = ?".to_string(),
                vec![
                    Value::Text("shears".into()),
                    Value::Double(3.0),
                    Value::BigInt(1)
                ]
            )]
        );
    }

    #[test]
    fn test_merge_loads_when_not_cached() {
        let (mut session, state) = session();
        state
            .lock()
            .unwrap()
            .rows
            .push_back(vec![product_row(2, "glue", 1.0)]);
        let merged = session.merge(&product(2, "glue", 1.5)).unwrap();
        assert_eq!(merged.read().unwrap().price, 1.5);
        assert_eq!(session.cached_entities(), 1);

        let err = session.merge(&product(3, "none", 1.0)).unwrap_err();
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_explicit_update_writes_given_columns_and_evicts() {
        let (mut session, state, handle) = loaded();
        let entity = handle.read().unwrap().clone();
        session
            .update(&entity, [("price", Value::Double(9.0))])
            .unwrap();
        assert_eq!(session.pending_actions().updates, 1);

        session.flush().unwrap();
        assert_eq!(
            state.lock().unwrap().executed,
            vec![(
                "UPDATE products SET price = ? WHERE id = ?".to_string(),
                vec![Value::Double(9.0), Value::BigInt(1)]
            )]
        );
        assert_eq!(handle.read().unwrap().price, 1.0);
        assert!(!session.contains(&entity).unwrap());
    }

    #[test]
    fn test_explicit_update_argument_errors() {
        let (mut session, _state, handle) = loaded();
        let entity = handle.read().unwrap().clone();
        assert!(
            session
                .update(&entity, [("id", Value::BigInt(2))])
                .unwrap_err()
                .is_invalid_argument()
        );
        assert!(
            session
                .update(&entity, [("colour", Value::Null)])
                .unwrap_err()
                .is_mapping()
        );
        assert!(
            session
                .update::<Product, Vec<(&str, Value)>, _, _>(&entity, Vec::new())
                .unwrap_err()
                .is_invalid_argument()
        );
    }

    #[test]
    fn test_failed_action_stops_flush() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 2.0;
        state.lock().unwrap().fail_execute = true;
        let err = session.flush().unwrap_err();
        assert!(err.is_storage());
        assert_eq!(session.pending_actions().total(), 0);
    }

    #[test]
    fn test_rejected_id_change_queues_no_updates() {
        let (mut session, state, first) = loaded();
        state
            .lock()
            .unwrap()
            .rows
            .push_back(vec![product_row(2, "glue", 3.0)]);
        let second = session.find::<Product>(2).unwrap().unwrap();
        first.write().unwrap().price = 5.0;
        second.write().unwrap().id = Some(99);

        assert!(session.flush().unwrap_err().is_illegal_state());
        assert_eq!(session.pending_actions(), PendingActions::default());

        second.write().unwrap().id = Some(2);
        session.flush().unwrap();
        assert_eq!(
            executed_sql(&state),
            vec!["UPDATE products SET price = ? WHERE id = ?"]
        );
    }

    #[test]
    fn test_failed_insert_drops_dirty_updates_behind_it() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 2.0;
        session
            .save(Product {
                id: None,
                name: "tape".into(),
                price: 0.5,
            })
            .unwrap();
        state.lock().unwrap().fail_execute = true;
        assert!(session.flush().unwrap_err().is_storage());
        assert_eq!(session.pending_actions().total(), 0);

        state.lock().unwrap().fail_execute = false;
        session.flush().unwrap();
        session.flush().unwrap();
        assert_eq!(
            executed_sql(&state),
            vec!["UPDATE products SET price = ? WHERE id = ?"]
        );
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    #[test]
    fn test_commit_before_begin_is_illegal() {
        let (mut session, _state) = session();
        let err = session.commit().unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(err.to_string(), "Cannot commit not active transaction");
    }

    #[test]
    fn test_begin_twice_opens_one_transaction() {
        let (mut session, state) = session();
        session.begin().unwrap();
        assert!(session.begin().unwrap_err().is_illegal_state());
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN"]);
    }

    #[test]
    fn test_commit_flushes_first() {
        let (mut session, state, handle) = loaded();
        session.begin().unwrap();
        handle.write().unwrap().price = 2.0;
        session.commit().unwrap();
        let state = state.lock().unwrap();
        assert_eq!(state.executed.len(), 1);
        assert_eq!(state.log, vec!["BEGIN", "COMMIT"]);
        drop(state);
        assert_eq!(
            session.transaction_status(),
            Some(TransactionStatus::Committed)
        );
    }

    #[test]
    fn test_begin_after_commit_starts_new_transaction() {
        let (mut session, state) = session();
        session.begin().unwrap();
        session.commit().unwrap();
        session.begin().unwrap();
        assert_eq!(session.transaction_status(), Some(TransactionStatus::Active));
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN", "COMMIT", "BEGIN"]);
    }

    #[test]
    fn test_flush_failure_during_commit_allows_rollback() {
        let (mut session, state, handle) = loaded();
        session.begin().unwrap();
        handle.write().unwrap().price = 2.0;
        state.lock().unwrap().fail_execute = true;

        assert!(session.commit().unwrap_err().is_storage());
        assert_eq!(
            session.transaction_status(),
            Some(TransactionStatus::FailedCommit)
        );
        session.rollback().unwrap();
        assert_eq!(
            session.transaction_status(),
            Some(TransactionStatus::RolledBack)
        );
    }

    #[test]
    fn test_rollback_discards_pending_work() {
        let (mut session, state, _handle) = loaded();
        session.begin().unwrap();
        session.save(product(5, "glue", 1.0)).unwrap();
        session.rollback().unwrap();
        assert_eq!(session.pending_actions().total(), 0);
        assert_eq!(session.cached_entities(), 0);
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_rollback_without_transaction_is_illegal() {
        let (mut session, _state) = session();
        let err = session.rollback().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot rollback transaction with status NOT_ACTIVE"
        );
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn test_close_flushes_and_releases() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 2.0;
        session.close().unwrap();
        assert!(!session.is_open());
        let state = state.lock().unwrap();
        assert_eq!(state.executed.len(), 1);
        assert!(state.closed);
        assert_eq!(state.log, vec!["CLOSE"]);
    }

    #[test]
    fn test_close_releases_connection_when_flush_fails() {
        let (mut session, state, handle) = loaded();
        handle.write().unwrap().price = 2.0;
        state.lock().unwrap().fail_execute = true;
        assert!(session.close().unwrap_err().is_storage());
        assert!(state.lock().unwrap().closed);
        assert!(!session.is_open());
    }

    #[test]
    fn test_closed_session_rejects_operations() {
        let (mut session, _state) = session();
        session.close().unwrap();
        session.close().unwrap();

        let err = session.find::<Product>(1).unwrap_err();
        assert_eq!(err.to_string(), "Session is already closed");
        assert!(session.flush().unwrap_err().is_illegal_state());
        assert!(session.begin().unwrap_err().is_illegal_state());
        assert!(session.save(product(1, "a", 1.0)).unwrap_err().is_illegal_state());
        assert!(session.contains(&product(1, "a", 1.0)).unwrap_err().is_illegal_state());
        assert!(session.connection_mut().is_err());
    }

    #[test]
    fn test_close_without_flush() {
        let mut registry = EntityRegistry::new();
        registry.register::<Product>().unwrap();
        let (conn, state) = MockConnection::new();
        let config = SessionConfig {
            flush_on_close: false,
            ..SessionConfig::default()
        };
        let mut session = Session::with_config(conn, Arc::new(registry), config);
        session.save(product(1, "a", 1.0)).unwrap();
        session.close().unwrap();
        assert!(state.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_clear_drops_cache_and_actions() {
        let (mut session, _state, _handle) = loaded();
        session.save(product(2, "b", 1.0)).unwrap();
        session.clear().unwrap();
        assert_eq!(session.cached_entities(), 0);
        assert_eq!(session.pending_actions(), PendingActions::default());
    }
}
