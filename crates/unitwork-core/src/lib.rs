//! Core types and traits for the unitwork session engine.
//!
//! This crate provides the foundations the session is built on:
//!
//! - `Entity` trait and `FieldInfo` metadata for struct-to-table mapping
//! - `Value` and `Row` for data flowing to and from storage
//! - `Connection` trait implemented by drivers
//! - `SqlDialect` fragments and the temporal converter table
//! - `PersistenceUnit` configuration

pub mod config;
pub mod connection;
pub mod convert;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod field;
pub mod row;
pub mod temporal;
pub mod types;
pub mod value;

pub use config::{PersistenceConfig, PersistenceUnit};
pub use connection::{Connection, ConnectionSource};
pub use convert::{Converter, converter_for};
pub use dialect::SqlDialect;
pub use entity::Entity;
pub use error::{Error, Result};
pub use field::FieldInfo;
pub use row::{ColumnInfo, FromValue, Row};
pub use temporal::{Date, Time, Timestamp, TimestampTz};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
