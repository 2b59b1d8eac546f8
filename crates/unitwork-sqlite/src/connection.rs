//! SQLite connection implementation.
//!
//! This module provides a safe wrapper around SQLite's C API and implements
//! the blocking [`Connection`] trait from unitwork-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::borrow_as_ptr)]

use crate::types;
mod ffi {
    pub use libsqlite3_sys::*;

    // The pregenerated bindings shipped with libsqlite3-sys omit this symbol;
    // the bundled amalgamation still compiles and exports it.
    unsafe extern "C" {
        pub fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
    }
}
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Arc;
use unitwork_core::error::{
    ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind,
};
use unitwork_core::row::ColumnInfo;
use unitwork_core::{
    Connection, ConnectionSource, Error, PersistenceUnit, Result, Row, SqlDialect, Value,
};

/// Where and how to open a SQLite database.
///
/// Also a [`ConnectionSource`]: each `connect` opens a fresh handle on the
/// same path.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// File path, or `":memory:"`.
    pub path: String,
    pub flags: OpenFlags,
    /// How long a statement waits on another connection's lock before
    /// failing with [`QueryErrorKind::Busy`].
    pub busy_timeout_ms: u32,
}

/// Access mode passed to `sqlite3_open_v2`.
///
/// With neither `read_only` nor `read_write` set the database is opened
/// read-write and created when missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    pub create: bool,
    /// Interpret `file:` URIs in the path.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Read-write on an existing database.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Self::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            create: true,
            ..Self::read_write()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let selected = [
            (self.read_only, ffi::SQLITE_OPEN_READONLY),
            (self.read_write, ffi::SQLITE_OPEN_READWRITE),
            (self.create, ffi::SQLITE_OPEN_CREATE),
            (self.uri, ffi::SQLITE_OPEN_URI),
        ];
        let flags = selected
            .iter()
            .filter(|(on, _)| *on)
            .fold(0, |acc, (_, bit)| acc | bit);
        if self.read_only || self.read_write {
            flags
        } else {
            flags | ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// A private in-memory database; every connection gets its own.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Build a config from a persistence unit.
    ///
    /// Fails if the unit is invalid or declares a dialect other than SQLite.
    pub fn from_unit(unit: &PersistenceUnit) -> Result<Self> {
        unit.validate()?;
        unit.check_dialect(SqlDialect::Sqlite)?;
        Ok(Self::file(unit.url.clone()).busy_timeout(unit.busy_timeout_ms))
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

impl ConnectionSource for SqliteConfig {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection> {
        SqliteConnection::open(self)
    }
}

/// A connection to a SQLite database.
///
/// Owned by exactly one session at a time; it may move between threads but
/// is never shared.
pub struct SqliteConnection {
    db: *mut ffi::sqlite3,
    path: String,
    /// Set by `begin`, cleared by `commit`/`rollback`. SQLite's autocommit
    /// flag is the source of truth; this only tells "never begun" apart from
    /// "ended by SQLite".
    began: bool,
}

// SAFETY: the handle is only reached through `&mut self` or by value, so it
// is never used from two threads at once. The bundled library is built in
// serialized mode, which allows a handle to move between threads.
unsafe impl Send for SqliteConnection {}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                error_string(rc)
            } else {
                // SAFETY: db is valid even on failure and must still be closed
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, "Opened SQLite database");
        Ok(Self {
            db,
            path: config.path.clone(),
            began: false,
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Open the database a persistence unit describes.
    pub fn connect(unit: &PersistenceUnit) -> Result<Self> {
        Self::open(&SqliteConfig::from_unit(unit)?)
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute SQL directly without preparing (for DDL, etc.)
    ///
    /// The text may hold several statements separated by semicolons.
    pub fn execute_raw(&mut self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut errmsg_ptr: *mut std::ffi::c_char = ptr::null_mut();

        tracing::trace!(sql = %sql, "execute_raw");
        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(self.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg_ptr)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg_ptr.is_null() {
                error_string(rc)
            } else {
                // SAFETY: errmsg_ptr was allocated by SQLite and is freed here
                unsafe {
                    let msg = CStr::from_ptr(errmsg_ptr).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg_ptr.cast());
                    msg
                }
            };
            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc),
                sql: Some(sql.to_string()),
                message: msg,
                source: None,
            }));
        }
        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(self.db) }
    }

    /// Whether SQLite has an open transaction on this handle.
    fn engine_in_transaction(&self) -> bool {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_get_autocommit(self.db) == 0 }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> i32 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(self.db) }
    }

    /// Prepare a statement and bind `params` to it.
    fn prepare_bound(&mut self, sql: &str, params: &[Value]) -> Result<Statement> {
        let stmt = Statement::prepare(self.db, sql)?;
        for (i, param) in params.iter().enumerate() {
            let converted = types::storage_form(param)?;
            let value = converted.as_ref().unwrap_or(param);
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.raw, (i + 1) as c_int, value) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(self.db, sql, i + 1));
            }
        }
        Ok(stmt)
    }

    fn run_statement(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "execute");
        let stmt = self.prepare_bound(sql, params)?;
        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => Ok(self.changes().max(0) as u64),
            _ => Err(step_error(self.db, sql)),
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is valid and closed exactly once
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
            self.db = ptr::null_mut();
        }
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, params = params.len(), "query");
        let stmt = self.prepare_bound(sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let col_names = (0..col_count)
            .map(|i| {
                // SAFETY: stmt is valid and i is in range
                unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt just returned SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(self.db, sql)),
            }
        }
        Ok(rows)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run_statement(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.run_statement(sql, params)?;
        Ok(self.last_insert_rowid())
    }

    fn begin(&mut self) -> Result<()> {
        if self.engine_in_transaction() {
            return Err(transaction_state_error("Already in a transaction"));
        }
        self.execute_raw("BEGIN")?;
        self.began = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let began = std::mem::take(&mut self.began);
        if !self.engine_in_transaction() {
            return Err(transaction_state_error(if began {
                "Transaction was already rolled back by SQLite"
            } else {
                "Not in a transaction"
            }));
        }
        self.execute_raw("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        let began = std::mem::take(&mut self.began);
        if self.engine_in_transaction() {
            return self.execute_raw("ROLLBACK");
        }
        if began {
            // SQLite ends the transaction itself after some errors (BUSY, FULL, IOERR).
            tracing::debug!(path = %self.path, "Transaction already rolled back by SQLite");
            Ok(())
        } else {
            Err(transaction_state_error("Not in a transaction"))
        }
    }

    fn in_transaction(&self) -> bool {
        self.engine_in_transaction()
    }

    fn close(mut self) -> Result<()> {
        let db = std::mem::replace(&mut self.db, ptr::null_mut());
        if db.is_null() {
            return Ok(());
        }
        // SAFETY: db is valid; ownership moved out of `self` so Drop skips it
        let rc = unsafe { ffi::sqlite3_close_v2(db) };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Close,
                message: format!("Failed to close database: {}", error_string(rc)),
                source: None,
            }));
        }
        tracing::debug!(path = %self.path, "Closed SQLite database");
        Ok(())
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }
        Ok(Self { raw })
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw is a statement from sqlite3_prepare_v2 (finalizing null is a no-op)
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

// Helper functions

fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe {
        let ptr = ffi::sqlite3_errstr(code);
        if ptr.is_null() {
            format!("SQLite error {}", code)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

/// # Safety
/// `db` must be a valid database handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: forwarded from the caller
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)).to_string_lossy().into_owned() }
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn transaction_state_error(message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: None,
        message: message.to_string(),
        source: None,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { errmsg(db) };
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        message: format!("Failed to bind parameter {}: {}", param_index, msg),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (errmsg(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message: msg,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}
