//! Row mapper: SQL templates and statement execution for mapped entities.
//!
//! Column lists are always emitted in column-name order so that the same
//! operation produces the same SQL string every time.

use crate::registry::EntityDescriptor;
use unitwork_core::{Connection, Entity, Error, Result, Row, SqlDialect, Value};

fn table(d: &EntityDescriptor, dialect: SqlDialect) -> String {
    dialect.identifier(d.table()).into_owned()
}

fn id_filter(d: &EntityDescriptor, dialect: SqlDialect) -> String {
    format!("{} = ?", dialect.identifier(d.id_column()))
}

fn assignments(columns: &[&str], dialect: SqlDialect, separator: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{} = ?", dialect.identifier(c)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// `SELECT * FROM {table} WHERE {id} = ?`
pub fn select_by_id_sql(d: &EntityDescriptor, dialect: SqlDialect) -> String {
    format!("SELECT * FROM {} WHERE {}", table(d, dialect), id_filter(d, dialect))
}

/// `SELECT * FROM {table}` bounded by the dialect's paging clause.
pub fn select_page_sql(d: &EntityDescriptor, dialect: SqlDialect, limit: i64, offset: i64) -> String {
    format!(
        "SELECT * FROM {}{}",
        table(d, dialect),
        dialect.limit_clause_with_offset(limit, offset)
    )
}

/// `SELECT * FROM {table} WHERE {c1} = ? AND {c2} = ?`
pub fn select_by_columns_sql(d: &EntityDescriptor, dialect: SqlDialect, columns: &[&str]) -> String {
    format!(
        "SELECT * FROM {} WHERE {}",
        table(d, dialect),
        assignments(columns, dialect, " AND ")
    )
}

/// `INSERT INTO {table} ({cols}) VALUES (?, ...)`
pub fn insert_sql(d: &EntityDescriptor, dialect: SqlDialect, columns: &[&str]) -> String {
    let names = columns
        .iter()
        .map(|c| dialect.identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {} ({names}) VALUES ({placeholders})", table(d, dialect))
}

/// `UPDATE {table} SET {c1} = ?, {c2} = ? WHERE {id} = ?`
pub fn update_sql(d: &EntityDescriptor, dialect: SqlDialect, columns: &[&str]) -> String {
    format!(
        "UPDATE {} SET {} WHERE {}",
        table(d, dialect),
        assignments(columns, dialect, ", "),
        id_filter(d, dialect)
    )
}

/// `DELETE FROM {table} WHERE {id} = ?`
pub fn delete_sql(d: &EntityDescriptor, dialect: SqlDialect) -> String {
    format!("DELETE FROM {} WHERE {}", table(d, dialect), id_filter(d, dialect))
}

/// Executes mapped statements on a borrowed connection.
pub struct Persister<'a, C: Connection> {
    conn: &'a mut C,
}

impl<'a, C: Connection> Persister<'a, C> {
    pub fn new(conn: &'a mut C) -> Self {
        Self { conn }
    }

    /// Run a query and map every row to `E`, converting stored values back.
    pub fn select<E: Entity>(
        &mut self,
        d: &EntityDescriptor,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<E>> {
        tracing::trace!(sql = %sql, params = params.len(), "select");
        let rows = self.conn.query(sql, params)?;
        rows.iter().map(|row| map_row::<E>(d, row)).collect()
    }

    /// Insert a row and return the generated key.
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        tracing::trace!(sql = %sql, params = params.len(), "insert");
        self.conn.insert(sql, params)
    }

    /// Update rows: SET parameters first, then filter parameters.
    pub fn update(
        &mut self,
        sql: &str,
        set_params: Vec<Value>,
        filter_params: Vec<Value>,
    ) -> Result<u64> {
        let mut params = set_params;
        params.extend(filter_params);
        tracing::trace!(sql = %sql, params = params.len(), "update");
        self.conn.execute(sql, &params)
    }

    /// Delete by id.
    pub fn delete(&mut self, sql: &str, id: Value) -> Result<u64> {
        tracing::trace!(sql = %sql, "delete");
        self.conn.execute(sql, &[id])
    }
}

fn map_row<E: Entity>(d: &EntityDescriptor, row: &Row) -> Result<E> {
    let mut values = Vec::with_capacity(row.len());
    for (column, value) in row.iter() {
        let value = d.from_storage(column, value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(column.to_string());
                Error::Type(te)
            }
            e => e,
        })?;
        values.push(value);
    }
    E::from_row(&Row::with_columns(row.column_info(), values))
}
