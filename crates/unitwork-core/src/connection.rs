//! Database connection trait.
//!
//! [`Connection`] is the blocking boundary between the session engine and a
//! driver. A session owns exactly one connection and releases it through
//! [`Connection::close`].

use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A database connection capable of executing statements.
///
/// All methods block the calling thread for the duration of their I/O.
/// Parameters are bound positionally to `?` placeholders.
///
/// # Transaction Support
///
/// [`begin`](Connection::begin) leaves autocommit mode until the matching
/// [`commit`](Connection::commit) or [`rollback`](Connection::rollback).
/// Outside a transaction every statement commits on its own.
pub trait Connection: Send {
    /// Dialect spoken by this connection.
    fn dialect(&self) -> SqlDialect;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the key generated for the new row.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Disable autocommit and start a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction and restore autocommit.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction and restore autocommit.
    fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    /// Release the connection.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Something that can open fresh connections, one per session.
pub trait ConnectionSource: Send + Sync {
    /// The connection type produced.
    type Connection: Connection;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection>;
}

impl<F, C> ConnectionSource for F
where
    F: Fn() -> Result<C> + Send + Sync,
    C: Connection,
{
    type Connection = C;

    fn connect(&self) -> Result<C> {
        self()
    }
}
