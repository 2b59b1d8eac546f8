//! Persistence context: identity map plus load-time snapshots.
//!
//! The identity map guarantees that within one session each database row is
//! represented by a single shared instance. Entities are held as
//! `Arc<RwLock<E>>`, so two lookups of the same key hand out the same
//! object and mutations through one handle are visible through every other.
//!
//! Dirty checking compares each cached entity against the column values
//! captured when it was last known to be in sync with storage. No write
//! interception is needed: any in-place mutation shows up in the diff.
//!
//! # Example
//!
//! ```ignore
//! let handle = session.find::<Product>(1)?.unwrap();
//! handle.write().unwrap().price = 2.0;
//! // flush issues `UPDATE products SET price = ? WHERE id = ?`
//! session.flush()?;
//! ```

use crate::key::EntityKey;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, TryLockError};
use unitwork_core::{Entity, Error, Result, Value};

/// Shared handle to a managed entity.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Column values in column-name order.
pub type ColumnValues = Vec<(&'static str, Value)>;

/// Type-erased view of a managed entity.
///
/// Implemented for `RwLock<E>`. Locks are only ever tried, never waited on:
/// a session is driven from one thread, so a held lock means the caller
/// still holds a guard on the entity while calling into the session.
pub trait AnyEntity: Send + Sync {
    /// Type identifier of the entity.
    fn entity_type(&self) -> TypeId;

    /// Short entity name, for messages.
    fn entity_name(&self) -> &'static str;

    /// Current column values, sorted by column name.
    fn row(&self) -> Result<ColumnValues>;

    /// Current id value.
    fn id_value(&self) -> Result<Value>;

    /// Assign one column.
    fn set_column(&self, column: &str, value: Value) -> Result<()>;

    /// Upcast for downcasting to the concrete lock type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

fn locked(entity: &'static str) -> Error {
    Error::illegal_state(format!(
        "{} is locked by the caller while the session accesses it",
        entity
    ))
}

impl<E: Entity> AnyEntity for RwLock<E> {
    fn entity_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn entity_name(&self) -> &'static str {
        E::ENTITY_NAME
    }

    fn row(&self) -> Result<ColumnValues> {
        let guard = match self.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(locked(E::ENTITY_NAME)),
        };
        let mut row = guard.to_row();
        row.sort_by(|a, b| a.0.cmp(b.0));
        Ok(row)
    }

    fn id_value(&self) -> Result<Value> {
        match self.try_read() {
            Ok(guard) => Ok(guard.id_value()),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner().id_value()),
            Err(TryLockError::WouldBlock) => Err(locked(E::ENTITY_NAME)),
        }
    }

    fn set_column(&self, column: &str, value: Value) -> Result<()> {
        let mut guard = match self.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(locked(E::ENTITY_NAME)),
        };
        guard.set_column(column, value)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Recover the typed handle behind a type-erased one.
pub fn downcast<E: Entity>(handle: &Arc<dyn AnyEntity>) -> Option<EntityRef<E>> {
    Arc::clone(handle).into_any().downcast::<RwLock<E>>().ok()
}

/// One cached entity whose columns differ from its snapshot.
pub struct DirtyEntity {
    pub key: EntityKey,
    pub entity: Arc<dyn AnyEntity>,
    /// Changed columns with their current values, sorted by column name.
    pub changes: ColumnValues,
}

/// Identity map and snapshot store for one session.
#[derive(Default)]
pub struct PersistenceContext {
    entities: HashMap<EntityKey, Arc<dyn AnyEntity>>,
    snapshots: HashMap<EntityKey, ColumnValues>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup.
    pub fn get<E: Entity>(&self, key: &EntityKey) -> Option<EntityRef<E>> {
        self.entities.get(key).and_then(downcast::<E>)
    }

    /// Type-erased lookup.
    pub fn get_handle(&self, key: &EntityKey) -> Option<&Arc<dyn AnyEntity>> {
        self.entities.get(key)
    }

    /// Insert or replace the cache entry for `key`. No snapshot is taken.
    pub fn put(&mut self, key: EntityKey, entity: Arc<dyn AnyEntity>) {
        self.entities.insert(key, entity);
    }

    /// Capture the entity's current column values as the baseline for `key`.
    pub fn put_snapshot(&mut self, key: EntityKey, entity: &dyn AnyEntity) -> Result<()> {
        let row = entity.row()?;
        tracing::trace!(key = %key, columns = row.len(), "Captured snapshot");
        self.snapshots.insert(key, row);
        Ok(())
    }

    /// Overwrite selected snapshot columns with values now known to be stored.
    pub fn refresh_snapshot(&mut self, key: &EntityKey, written: &[(&'static str, Value)]) {
        let Some(snapshot) = self.snapshots.get_mut(key) else {
            return;
        };
        for (column, value) in written {
            if let Some(slot) = snapshot.iter_mut().find(|(c, _)| c == column) {
                slot.1 = value.clone();
            }
        }
    }

    /// Baseline captured for `key`, if any.
    pub fn snapshot(&self, key: &EntityKey) -> Option<&[(&'static str, Value)]> {
        self.snapshots.get(key).map(Vec::as_slice)
    }

    /// Remove the entry and its snapshot. Returns whether an entry was cached.
    pub fn evict(&mut self, key: &EntityKey) -> bool {
        self.snapshots.remove(key);
        self.entities.remove(key).is_some()
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Cached entities whose current column values differ from their snapshot.
    ///
    /// Only differing columns are reported. Entities without a snapshot are
    /// skipped rather than treated as fully dirty.
    pub fn changed_columns(&self) -> Result<Vec<DirtyEntity>> {
        let mut dirty = Vec::new();
        for (key, snapshot) in &self.snapshots {
            let Some(entity) = self.entities.get(key) else {
                continue;
            };
            let changes: ColumnValues = entity
                .row()?
                .into_iter()
                .filter(|(column, value)| {
                    snapshot
                        .iter()
                        .find(|(c, _)| c == column)
                        .is_none_or(|(_, old)| !old.same_as(value))
                })
                .collect();
            if !changes.is_empty() {
                dirty.push(DirtyEntity {
                    key: key.clone(),
                    entity: Arc::clone(entity),
                    changes,
                });
            }
        }
        Ok(dirty)
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Evict everything.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.snapshots.clear();
    }
}
