//! Entity registry and mapping descriptors.
//!
//! Every entity type a session may touch is registered once with the
//! session factory. Registration validates the type's metadata and builds an
//! [`EntityDescriptor`] with everything the session needs at run time: the
//! table, the id column, the sorted column list and each column's storage
//! converter.

use crate::key::EntityKey;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use unitwork_core::{Converter, Entity, Error, FieldInfo, Result, Value, converter_for};

/// Mapping descriptor for one registered entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    type_id: TypeId,
    entity_name: &'static str,
    table: &'static str,
    id: &'static FieldInfo,
    columns: Vec<&'static FieldInfo>,
    converters: HashMap<&'static str, &'static Converter>,
}

impl EntityDescriptor {
    /// Validate `E`'s metadata and build its descriptor.
    pub fn of<E: Entity>() -> Result<Self> {
        let name = E::ENTITY_NAME;
        if E::TABLE_NAME.trim().is_empty() {
            return Err(Error::mapping(
                name,
                format!("{} does not declare a table name", name),
            ));
        }

        let fields = E::fields();
        let mut ids = fields.iter().filter(|f| f.id);
        let id = ids
            .next()
            .ok_or_else(|| Error::mapping(name, format!("{} does not have an id field", name)))?;
        if ids.next().is_some() {
            return Err(Error::mapping(
                name,
                format!("{} has more than one id field", name),
            ));
        }

        let mut seen = HashSet::new();
        for field in fields {
            if !seen.insert(field.column_name) {
                return Err(Error::mapping(
                    name,
                    format!(
                        "{} declares column '{}' more than once",
                        name, field.column_name
                    ),
                ));
            }
        }

        let mut columns: Vec<&'static FieldInfo> = fields.iter().collect();
        columns.sort_by_key(|f| f.column_name);

        let converters = columns
            .iter()
            .filter_map(|f| converter_for(f.sql_type).map(|c| (f.column_name, c)))
            .collect();

        Ok(Self {
            type_id: TypeId::of::<E>(),
            entity_name: name,
            table: E::TABLE_NAME,
            id,
            columns,
            converters,
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    /// Table the entity maps to.
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// The id field.
    pub fn id_field(&self) -> &'static FieldInfo {
        self.id
    }

    /// Id column name.
    pub fn id_column(&self) -> &'static str {
        self.id.column_name
    }

    /// All mapped fields, sorted by column name.
    pub fn columns(&self) -> &[&'static FieldInfo] {
        &self.columns
    }

    /// Field mapped to `column`.
    pub fn field(&self, column: &str) -> Option<&'static FieldInfo> {
        self.columns
            .binary_search_by(|f| f.column_name.cmp(column))
            .ok()
            .map(|i| self.columns[i])
    }

    /// Check a primary-key value against the id field and build its key.
    ///
    /// Integer keys of any width are accepted when the value fits the
    /// declared id type and are normalised to that width.
    pub fn key(&self, id: Value) -> Result<EntityKey> {
        if id.is_null() {
            return Err(Error::null_argument("primaryKey"));
        }
        let id = self.id.sql_type.coerce(&id).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Primary key type mismatch for {}: expected {}, found {}",
                self.entity_name,
                self.id.sql_type.sql_name(),
                id.type_name()
            ))
        })?;
        Ok(EntityKey::new(self.type_id, self.entity_name, id))
    }

    /// Convert an entity value for binding into a statement.
    pub fn to_storage(&self, column: &str, value: Value) -> Result<Value> {
        match self.converters.get(column) {
            Some(converter) => (converter.to_storage)(value),
            None => Ok(value),
        }
    }

    /// Convert a fetched value back to its entity form.
    pub fn from_storage(&self, column: &str, value: Value) -> Result<Value> {
        match self.converters.get(column) {
            Some(converter) => (converter.from_storage)(value),
            None => Ok(value),
        }
    }
}

/// Registered entity types, keyed by type identifier.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    entries: HashMap<TypeId, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `E`. Registering a type twice is a no-op.
    pub fn register<E: Entity>(&mut self) -> Result<()> {
        if self.is_entity::<E>() {
            return Ok(());
        }
        let descriptor = EntityDescriptor::of::<E>()?;
        tracing::debug!(
            entity = E::ENTITY_NAME,
            table = E::TABLE_NAME,
            columns = descriptor.columns.len(),
            "Registered entity"
        );
        self.entries.insert(TypeId::of::<E>(), Arc::new(descriptor));
        Ok(())
    }

    /// Whether `E` is a registered entity.
    pub fn is_entity<E: Entity>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<E>())
    }

    /// Descriptor for `E`, or a mapping error if `E` was never registered.
    pub fn descriptor<E: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.entries.get(&TypeId::of::<E>()).cloned().ok_or_else(|| {
            Error::mapping(
                E::ENTITY_NAME,
                format!("{} is not defined as entity", E::ENTITY_NAME),
            )
        })
    }

    /// Descriptor by type identifier.
    pub fn get(&self, type_id: TypeId) -> Option<Arc<EntityDescriptor>> {
        self.entries.get(&type_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
