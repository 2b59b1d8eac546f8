//! Entity trait: the per-type mapping descriptor.
//!
//! An `Entity` is a struct mapped to one table, one column per field. The
//! descriptor is static metadata plus three conversions (to a row, from a
//! row, and single-column assignment), so the session never needs runtime
//! reflection. It is normally produced by `#[derive(Entity)]` from
//! `unitwork-macros`.

use crate::Result;
use crate::error::Error;
use crate::field::FieldInfo;
use crate::row::Row;
use crate::value::Value;

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```ignore
/// use unitwork::Entity;
///
/// #[derive(Entity)]
/// #[entity(table = "products")]
/// struct Product {
///     #[entity(id)]
///     id: i64,
///     name: String,
///     price: f64,
/// }
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// Short name of the entity type, used in messages.
    const ENTITY_NAME: &'static str;

    /// Get field metadata for all mapped columns.
    fn fields() -> &'static [FieldInfo];

    /// Convert this instance to (column, value) pairs, in field order.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Assign one column's value onto this instance.
    fn set_column(&mut self, column: &str, value: Value) -> Result<()>;

    /// The id field, if the type declares one.
    fn id_field() -> Option<&'static FieldInfo> {
        Self::fields().iter().find(|f| f.id)
    }

    /// Current value of the id column (`Value::Null` if unset or undeclared).
    fn id_value(&self) -> Value {
        let Some(id) = Self::id_field() else {
            return Value::Null;
        };
        self.column_value(id.column_name).unwrap_or(Value::Null)
    }

    /// Current value of a single column.
    fn column_value(&self, column: &str) -> Option<Value> {
        self.to_row()
            .into_iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

/// Error for a column name the entity does not map.
pub fn unknown_column<E: Entity>(column: &str) -> Error {
    Error::mapping(
        E::ENTITY_NAME,
        format!("{} has no column named '{}'", E::ENTITY_NAME, column),
    )
}
