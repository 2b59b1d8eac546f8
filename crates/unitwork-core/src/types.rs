//! SQL type definitions and mapping.

use crate::value::Value;

/// Semantic column types understood by the session engine.
///
/// Each type has one canonical [`Value`] variant; see [`SqlType::coerce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Exact numeric kept as its decimal text.
    Decimal,
    Boolean,
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
}

impl SqlType {
    /// Name used in diagnostics and DDL.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    /// Coerce `value` into the canonical variant for this type, if the value's
    /// runtime type is acceptable for it.
    ///
    /// Integer values are accepted by any integer type they fit into and are
    /// re-tagged with that type's width. Every other type accepts exactly its
    /// own variant. Returns `None` on mismatch.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if self.is_integer() {
            let v = value.is_integer().then(|| value.as_i64()).flatten()?;
            return match self {
                SqlType::TinyInt => i8::try_from(v).ok().map(Value::TinyInt),
                SqlType::SmallInt => i16::try_from(v).ok().map(Value::SmallInt),
                SqlType::Integer => i32::try_from(v).ok().map(Value::Int),
                _ => Some(Value::BigInt(v)),
            };
        }
        let matches = matches!(
            (self, value),
            (SqlType::Real, Value::Float(_))
                | (SqlType::Double, Value::Double(_))
                | (SqlType::Decimal, Value::Decimal(_))
                | (SqlType::Boolean, Value::Bool(_))
                | (SqlType::Text, Value::Text(_))
                | (SqlType::Blob, Value::Bytes(_))
                | (SqlType::Date, Value::Date(_))
                | (SqlType::Time, Value::Time(_))
                | (SqlType::Timestamp, Value::Timestamp(_))
                | (SqlType::TimestampTz, Value::TimestampTz(_))
                | (SqlType::Uuid, Value::Uuid(_))
                | (SqlType::Json, Value::Json(_))
        );
        matches.then(|| value.clone())
    }
}

/// Column type of a Rust field type, used by the entity derive.
pub trait TypeInfo {
    const SQL_TYPE: SqlType;
    const NULLABLE: bool = false;
}

macro_rules! type_info {
    ($($ty:ty => $sql:ident),* $(,)?) => {$(
        impl TypeInfo for $ty {
            const SQL_TYPE: SqlType = SqlType::$sql;
        }
    )*};
}

// Unsigned types take the next wider signed column, matching `Value`'s `From` impls.
type_info!(
    bool => Boolean,
    i8 => TinyInt,
    u8 => SmallInt,
    i16 => SmallInt,
    u16 => Integer,
    i32 => Integer,
    u32 => BigInt,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    String => Text,
    Vec<u8> => Blob,
    [u8; 16] => Uuid,
    serde_json::Value => Json,
);

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}
