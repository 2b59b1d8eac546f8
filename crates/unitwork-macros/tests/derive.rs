use unitwork_core::{Date, Entity, Row, SqlType, Value};
use unitwork_macros::Entity;

#[derive(Debug, Clone, PartialEq, Entity)]
#[entity(table = "products")]
struct Product {
    #[entity(id, generated)]
    id: Option<i64>,
    name: String,
    #[entity(column = "unit_price")]
    price: f64,
    released: Option<Date>,
    #[entity(skip)]
    scratch: u32,
}

#[derive(Debug, Clone, PartialEq, Entity)]
struct OrderLine {
    #[entity(id)]
    code: String,
    quantity: i32,
}

#[test]
fn test_metadata() {
    assert_eq!(Product::TABLE_NAME, "products");
    assert_eq!(Product::ENTITY_NAME, "Product");
    assert_eq!(OrderLine::TABLE_NAME, "order_lines");

    let fields = Product::fields();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0].column_name, "id");
    assert!(fields[0].id && fields[0].generated && fields[0].nullable);
    assert_eq!(fields[0].sql_type, SqlType::BigInt);
    assert_eq!(fields[2].name, "price");
    assert_eq!(fields[2].column_name, "unit_price");
    assert_eq!(fields[3].sql_type, SqlType::Date);
    assert!(fields[3].nullable);

    assert_eq!(OrderLine::id_field().map(|f| f.sql_type), Some(SqlType::Text));
}

#[test]
fn test_row_round_trip_uses_column_names() {
    let product = Product {
        id: Some(1),
        name: "scissors".into(),
        price: 1.0,
        released: None,
        scratch: 9,
    };
    let pairs = product.to_row();
    assert_eq!(pairs[2], ("unit_price", Value::Double(1.0)));
    assert_eq!(pairs[3], ("released", Value::Null));

    let (names, values): (Vec<_>, Vec<_>) = pairs
        .into_iter()
        .map(|(c, v)| (c.to_string(), v))
        .unzip();
    let loaded = Product::from_row(&Row::new(names, values)).unwrap();
    assert_eq!(loaded.id, Some(1));
    assert_eq!(loaded.name, "scissors");
    assert_eq!(loaded.scratch, 0);
}

#[test]
fn test_set_column() {
    let mut line = OrderLine {
        code: "A-1".into(),
        quantity: 1,
    };
    line.set_column("quantity", Value::BigInt(5)).unwrap();
    assert_eq!(line.quantity, 5);
    assert_eq!(line.id_value(), Value::Text("A-1".into()));
    assert!(line.set_column("missing", Value::Null).unwrap_err().is_mapping());
    assert!(line.set_column("quantity", Value::Text("x".into())).is_err());
}
