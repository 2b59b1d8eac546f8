//! Blocking SQLite driver for unitwork.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate implements the `Connection` trait from unitwork-core on top of
//! libsqlite3 (compiled from the bundled amalgamation).
//!
//! # Example
//!
//! ```rust,ignore
//! use unitwork_core::{Connection, Value};
//! use unitwork_sqlite::SqliteConnection;
//!
//! let mut conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)")?;
//! let id = conn.insert(
//!     "INSERT INTO products (name, price) VALUES (?, ?)",
//!     &[Value::Text("scissors".into()), Value::Double(1.0)],
//! )?;
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite Type |
//! |-----------|-------------|
//! | `bool` | INTEGER (0/1) |
//! | `i8`, `i16`, `i32`, `i64` | INTEGER |
//! | `f32`, `f64` | REAL |
//! | `String` | TEXT |
//! | `Vec<u8>` | BLOB |
//! | `Option<T>` | NULL or T |
//! | `Date`, `Time`, `Timestamp` | TEXT (ISO-8601) |
//! | `Json` | TEXT |
//!
//! Integers read back as `Value::Int` when they fit in 32 bits and as
//! `Value::BigInt` otherwise; the entity mapping widens or narrows them.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

use std::ffi::CStr;

/// Version string of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe { CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// Version number of the linked SQLite library, e.g. 3045001.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { libsqlite3_sys::sqlite3_libversion_number() }
}
