//! Deferred writes and the queue that orders them.
//!
//! Writes requested through the session are recorded as [`Action`]s and only
//! reach storage when the queue is drained at flush time. Draining runs all
//! inserts, then all updates, then all deletes; within one kind actions run
//! in the order they were queued.

use crate::context::{AnyEntity, ColumnValues, PersistenceContext};
use crate::key::EntityKey;
use crate::persister::{self, Persister};
use crate::registry::EntityDescriptor;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use unitwork_core::{Connection, Result, Value};

/// Kind of a deferred write, ordered by execution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Insert = 1,
    Update = 2,
    Delete = 3,
}

impl ActionKind {
    /// Execution priority; lower runs first.
    pub const fn priority(self) -> u8 {
        self as u8
    }

    const fn bucket(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Insert => f.write_str("insert"),
            ActionKind::Update => f.write_str("update"),
            ActionKind::Delete => f.write_str("delete"),
        }
    }
}

/// Where an update came from, which decides how the cache follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Found by dirty checking: the cached instance already holds the
    /// written values, so its snapshot is brought forward.
    DirtyCheck,
    /// Requested column by column: the cached instance, if any, is stale
    /// afterwards and is evicted.
    Explicit,
}

/// One deferred write.
pub enum Action {
    /// Insert the entity's row, then cache and snapshot it under its id.
    Insert {
        entity: Arc<dyn AnyEntity>,
        descriptor: Arc<EntityDescriptor>,
    },
    /// Write exactly `columns` for the row identified by `key`.
    Update {
        key: EntityKey,
        descriptor: Arc<EntityDescriptor>,
        columns: ColumnValues,
        origin: UpdateOrigin,
    },
    /// Delete the row identified by `key`, then evict it.
    Delete {
        key: EntityKey,
        descriptor: Arc<EntityDescriptor>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Insert { .. } => ActionKind::Insert,
            Action::Update { .. } => ActionKind::Update,
            Action::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn priority(&self) -> u8 {
        self.kind().priority()
    }

    /// Run the write and bring the persistence context in line with it.
    pub fn execute<C: Connection>(
        self,
        conn: &mut C,
        context: &mut PersistenceContext,
    ) -> Result<()> {
        match self {
            Action::Insert { entity, descriptor } => {
                execute_insert(conn, context, entity, &descriptor)
            }
            Action::Update {
                key,
                descriptor,
                columns,
                origin,
            } => {
                let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
                let sql = persister::update_sql(&descriptor, conn.dialect(), &names);
                let set_params = columns
                    .iter()
                    .map(|(c, v)| descriptor.to_storage(c, v.clone()))
                    .collect::<Result<Vec<_>>>()?;
                let id = descriptor.to_storage(descriptor.id_column(), key.id().clone())?;
                Persister::new(conn).update(&sql, set_params, vec![id])?;
                match origin {
                    UpdateOrigin::DirtyCheck => context.refresh_snapshot(&key, &columns),
                    UpdateOrigin::Explicit => {
                        context.evict(&key);
                    }
                }
                tracing::trace!(key = %key, columns = ?names, "Executed update");
                Ok(())
            }
            Action::Delete { key, descriptor } => {
                let sql = persister::delete_sql(&descriptor, conn.dialect());
                let id = descriptor.to_storage(descriptor.id_column(), key.id().clone())?;
                Persister::new(conn).delete(&sql, id)?;
                context.evict(&key);
                tracing::trace!(key = %key, "Executed delete");
                Ok(())
            }
        }
    }
}

fn execute_insert<C: Connection>(
    conn: &mut C,
    context: &mut PersistenceContext,
    entity: Arc<dyn AnyEntity>,
    descriptor: &EntityDescriptor,
) -> Result<()> {
    let id_column = descriptor.id_column();
    let generated = descriptor.id_field().generated;

    let mut row = entity.row()?;
    let assign_id = generated
        && row
            .iter()
            .any(|(c, v)| *c == id_column && v.is_null());
    if assign_id {
        row.retain(|(c, _)| *c != id_column);
    }

    let columns: Vec<&str> = row.iter().map(|(c, _)| *c).collect();
    let params = row
        .into_iter()
        .map(|(c, v)| descriptor.to_storage(c, v))
        .collect::<Result<Vec<_>>>()?;
    let sql = persister::insert_sql(descriptor, conn.dialect(), &columns);
    let rowid = Persister::new(conn).insert(&sql, &params)?;

    if assign_id {
        entity.set_column(id_column, Value::BigInt(rowid))?;
    }
    let key = descriptor.key(entity.id_value()?)?;
    context.put(key.clone(), Arc::clone(&entity));
    context.put_snapshot(key.clone(), &*entity)?;
    tracing::trace!(key = %key, "Executed insert");
    Ok(())
}

/// Number of pending actions of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingActions {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingActions {
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Priority-ordered buffer of deferred writes: one FIFO per kind.
#[derive(Default)]
pub struct ActionQueue {
    buckets: [VecDeque<Action>; 3],
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.buckets[action.kind().bucket()].push_back(action);
    }

    /// Remove the next action: lowest priority number first, FIFO within a kind.
    pub fn pop(&mut self) -> Option<Action> {
        self.buckets.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Execute actions in priority order until the queue is empty.
    ///
    /// Stops at the first failure and returns it. Actions already executed
    /// are not undone and the failed one is discarded; undoing belongs to
    /// the surrounding transaction. Remaining dirty-check updates are
    /// dropped: their snapshots were not brought forward, so dirty checking
    /// queues them again.
    pub fn drain<C: Connection>(
        &mut self,
        conn: &mut C,
        context: &mut PersistenceContext,
    ) -> Result<usize> {
        let mut executed = 0;
        while let Some(action) = self.pop() {
            if let Err(err) = action.execute(conn, context) {
                let dropped = self.discard_dirty_check_updates();
                tracing::debug!(executed, dropped, "Drain stopped at failed action");
                return Err(err);
            }
            executed += 1;
        }
        Ok(executed)
    }

    fn discard_dirty_check_updates(&mut self) -> usize {
        let updates = &mut self.buckets[ActionKind::Update.bucket()];
        let before = updates.len();
        updates.retain(|action| {
            !matches!(
                action,
                Action::Update {
                    origin: UpdateOrigin::DirtyCheck,
                    ..
                }
            )
        });
        before - updates.len()
    }

    pub fn pending(&self) -> PendingActions {
        PendingActions {
            inserts: self.buckets[ActionKind::Insert.bucket()].len(),
            updates: self.buckets[ActionKind::Update.bucket()].len(),
            deletes: self.buckets[ActionKind::Delete.bucket()].len(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}
