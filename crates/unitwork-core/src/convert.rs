//! Storage converters for columns whose in-memory value differs from the
//! value the database keeps.
//!
//! Temporal columns travel as ISO-8601 text. The table is static and looked
//! up once per column when an entity is registered.

use crate::Result;
use crate::row::{FromValue, type_mismatch};
use crate::temporal::{Date, Time, Timestamp, TimestampTz};
use crate::types::SqlType;
use crate::value::Value;

/// A pair of conversions between entity values and stored values.
#[derive(Debug)]
pub struct Converter {
    /// Column type this converter applies to.
    pub sql_type: SqlType,
    /// Entity value to the value bound into a statement.
    pub to_storage: fn(Value) -> Result<Value>,
    /// Value read from a result set to the entity value.
    pub from_storage: fn(Value) -> Result<Value>,
}

macro_rules! iso_converter {
    ($name:ident, $ty:ident, $variant:ident, $label:literal) => {
        static $name: Converter = Converter {
            sql_type: SqlType::$variant,
            to_storage: |value| match value {
                Value::$variant(_) => Ok(Value::Text($ty::from_value(&value)?.to_string())),
                Value::Null | Value::Text(_) => Ok(value),
                other => Err(type_mismatch($label, &other)),
            },
            from_storage: |value| match value {
                Value::Text(ref s) => Ok(s.parse::<$ty>()?.into()),
                Value::Null | Value::$variant(_) => Ok(value),
                other => Err(type_mismatch($label, &other)),
            },
        };
    };
}

iso_converter!(DATE, Date, Date, "DATE");
iso_converter!(TIME, Time, Time, "TIME");
iso_converter!(TIMESTAMP, Timestamp, Timestamp, "TIMESTAMP");
iso_converter!(TIMESTAMP_TZ, TimestampTz, TimestampTz, "TIMESTAMPTZ");

/// The converter for a column type, if that type needs one.
pub fn converter_for(sql_type: SqlType) -> Option<&'static Converter> {
    match sql_type {
        SqlType::Date => Some(&DATE),
        SqlType::Time => Some(&TIME),
        SqlType::Timestamp => Some(&TIMESTAMP),
        SqlType::TimestampTz => Some(&TIMESTAMP_TZ),
        _ => None,
    }
}
