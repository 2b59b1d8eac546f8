//! Result rows and typed column extraction.
//!
//! A query yields a `Vec<Row>`; every row of one result set points at the
//! same [`ColumnInfo`], so column lookup by name costs one hash probe.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered column names of a result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (pos, name) in names.iter().enumerate() {
            // First occurrence wins for duplicated labels (e.g. joins).
            positions.entry(name.clone()).or_insert(pos);
        }
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of `name`, if the result set has such a column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a result set, or a column snapshot of an entity.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    /// Build a standalone row. Rows coming from the same statement should use
    /// [`Row::with_columns`] instead.
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len(), "row width mismatch");
        Self { columns, values }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a 0-based position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.values.get(self.columns.index_of(name)?)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.index_of(name).is_some()
    }

    /// Decode column `name` as `T`. Failures carry the column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let Some(value) = self.get_by_name(name) else {
            return Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("no column '{name}' in row"),
                column: Some(name.to_string()),
            }));
        };
        T::from_value(value).map_err(|err| match err {
            Error::Type(te) => Error::Type(TypeError {
                column: Some(name.to_string()),
                ..te
            }),
            other => other,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(&self.values)
    }
}

/// Decoding of a stored [`Value`] into a Rust field type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

/// Error for a value whose variant cannot become `expected`.
pub fn type_mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

macro_rules! narrow_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| type_mismatch(stringify!($ty), value))?;
                <$ty>::try_from(wide).map_err(|_| {
                    Error::Type(TypeError {
                        expected: stringify!($ty),
                        actual: format!("{wide} does not fit"),
                        column: None,
                    })
                })
            }
        }
    )*};
}

narrow_integer!(i8, i16, i32, u8, u16, u32);

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_mismatch("i64", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_mismatch("bool", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_mismatch("f64", value))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        if let Value::Float(v) = value {
            return Ok(*v);
        }
        f64::from_value(value)
            .map(|v| v as f32)
            .map_err(|_| type_mismatch("f32", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some(s) => Ok(s.to_owned()),
            None => Err(type_mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_bytes() {
            Some(b) => Ok(b.to_vec()),
            None => Err(type_mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(bytes) => Ok(*bytes),
            Value::Bytes(bytes) => {
                <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| type_mismatch("uuid", value))
            }
            _ => Err(type_mismatch("uuid", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(json) => Ok(json.clone()),
            Value::Text(text) => serde_json::from_str(text).map_err(|err| {
                Error::Type(TypeError {
                    expected: "json",
                    actual: format!("unparsable text ({err})"),
                    column: None,
                })
            }),
            _ => Err(type_mismatch("json", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scissors() -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "price".into()],
            vec![Value::Int(1), Value::Text("scissors".into()), Value::Double(1.0)],
        )
    }

    #[test]
    fn test_lookup_by_position_and_name() {
        let row = scissors();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("scissors".into())));
        assert!(row.contains_column("price"));
        assert!(!row.contains_column("weight"));
        assert_eq!(row.column_names().collect::<Vec<_>>(), ["id", "name", "price"]);
    }

    #[test]
    fn test_duplicate_labels_resolve_to_first() {
        let row = Row::new(vec!["a".into(), "a".into()], vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(row.get_by_name("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_typed_access_widens_integers() {
        let row = scissors();
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
        assert!((row.get_named::<f64>("price").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_errors_name_the_column() {
        let row = scissors();
        match row.get_named::<i64>("name").unwrap_err() {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("unexpected error: {other}"),
        }
        match row.get_named::<i64>("weight").unwrap_err() {
            Error::Type(te) => assert!(te.actual.contains("weight")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_decodes_only_into_option() {
        let row = Row::new(vec!["x".into()], vec![Value::Null]);
        assert_eq!(row.get_named::<Option<i32>>("x").unwrap(), None);
        assert!(row.get_named::<i32>("x").is_err());
    }

    #[test]
    fn test_narrowing_checks_range() {
        assert!(i8::from_value(&Value::BigInt(1_000)).is_err());
        assert!(u16::from_value(&Value::Int(-1)).is_err());
        assert_eq!(i32::from_value(&Value::BigInt(7)).unwrap(), 7);
    }

    #[test]
    fn test_uuid_from_blob() {
        let bytes = vec![7u8; 16];
        assert_eq!(<[u8; 16]>::from_value(&Value::Bytes(bytes)).unwrap(), [7u8; 16]);
        assert!(<[u8; 16]>::from_value(&Value::Bytes(vec![1, 2])).is_err());
    }
}
