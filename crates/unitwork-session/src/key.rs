//! Identity of a cached entity: its type plus its primary-key value.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use unitwork_core::Value;

/// Key of one entry in the persistence context.
///
/// Equality is structural on both the entity type and the id value. Keys
/// are normally built through `EntityDescriptor::key`, which normalises the
/// id to the width the entity declares.
#[derive(Debug, Clone)]
pub struct EntityKey {
    type_id: TypeId,
    entity_name: &'static str,
    id: Value,
}

impl EntityKey {
    pub fn new(type_id: TypeId, entity_name: &'static str, id: Value) -> Self {
        Self {
            type_id,
            entity_name,
            id,
        }
    }

    /// Type identifier of the entity.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Short entity name, for messages.
    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    /// Primary-key value.
    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.id.same_as(&other.id)
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        hash_value(&self.id, state);
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_name, self.id)
    }
}

/// Hash a value by variant and content, consistent with `Value::same_as`.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::TinyInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::SmallInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int(i) => {
            4u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            5u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            6u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Double(f) => {
            7u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            8u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            9u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            10u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            11u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Time(t) => {
            12u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Timestamp(ts) => {
            13u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::TimestampTz(ts) => {
            14u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            15u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            16u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}
