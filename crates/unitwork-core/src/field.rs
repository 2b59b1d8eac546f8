//! Field and column definitions.

use crate::types::SqlType;

/// Mapping metadata for one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// Semantic SQL type, used for key checks and converter lookup
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this field is the entity id
    pub id: bool,
    /// Whether the database assigns this field's value on insert
    pub generated: bool,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            id: false,
            generated: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark this field as the entity id.
    pub const fn id(mut self, value: bool) -> Self {
        self.id = value;
        self
    }

    /// Mark this field as database-generated.
    pub const fn generated(mut self, value: bool) -> Self {
        self.generated = value;
        self
    }
}
