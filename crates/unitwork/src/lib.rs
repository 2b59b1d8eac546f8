//! Unitwork - a Unit of Work session engine over SQL databases.
//!
//! A [`Session`] keeps an identity map of the entities it has loaded,
//! snapshots their column values, and defers every write until flush:
//!
//! - `find` returns the same shared instance for the same id
//! - mutations of managed instances are found by dirty checking at flush
//! - `save`, `delete` and `update` are queued and run inserts first, then
//!   updates, then deletes
//! - `begin`, `commit` and `rollback` delimit a transaction on the
//!   session's connection
//!
//! # Quick Start
//!
//! ```ignore
//! use unitwork::prelude::*;
//!
//! #[derive(Entity, Debug)]
//! #[entity(table = "products")]
//! struct Product {
//!     #[entity(id, generated)]
//!     id: Option<i64>,
//!     name: String,
//!     price: f64,
//! }
//!
//! let factory = SessionFactory::builder(SqliteConfig::file("shop.db"))
//!     .register::<Product>()
//!     .build()?;
//!
//! factory.run_within_tx(|session| {
//!     if let Some(product) = session.find::<Product>(1)? {
//!         product.write().unwrap().price = 2.0;
//!     }
//!     Ok(())
//! })?;
//! ```
//!
//! The derive generates paths into `unitwork_core`, so crates using it
//! depend on `unitwork-core` alongside this crate.

pub mod logging;

pub use unitwork_core::error::{
    ConfigError, ConnectionError, ConnectionErrorKind, MappingError, QueryError, QueryErrorKind,
    TransactionError, TransactionErrorKind, TypeError, UsageError, UsageErrorKind,
};
pub use unitwork_core::{
    Connection, ConnectionSource, Date, Entity, Error, FieldInfo, FromValue, PersistenceConfig,
    PersistenceUnit, Result, Row, SqlDialect, SqlType, Time, Timestamp, TimestampTz, TypeInfo,
    Value,
};

pub use unitwork_macros::Entity;

pub use unitwork_session::{
    ActionKind, EntityKey, EntityRef, EntityRegistry, PendingActions, Session, SessionConfig,
    SessionFactory, SessionFactoryBuilder, TransactionStatus,
};

pub use unitwork_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// Configuration-driven entry point.
pub struct Persistence;

impl Persistence {
    /// Build a SQLite-backed factory for the unit named `unit_name`.
    ///
    /// The unit's `log_level` is used to install logging if no subscriber
    /// is installed yet. `registrations` adds the entity types:
    ///
    /// ```ignore
    /// let factory = Persistence::create_session_factory(&config, "shop", |b| {
    ///     b.register::<Product>()
    /// })?;
    /// ```
    pub fn create_session_factory<F>(
        config: &PersistenceConfig,
        unit_name: &str,
        registrations: F,
    ) -> Result<SessionFactory<SqliteConfig>>
    where
        F: FnOnce(SessionFactoryBuilder<SqliteConfig>) -> SessionFactoryBuilder<SqliteConfig>,
    {
        let unit = config.unit(unit_name)?;
        let source = SqliteConfig::from_unit(unit)?;
        logging::init(&unit.log_level);
        tracing::info!(unit = %unit.name, url = %unit.url, "Creating session factory");
        registrations(SessionFactory::builder(source)).build()
    }
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use unitwork::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Connection, Date, Entity, EntityRef, Error, Persistence, PersistenceConfig,
        PersistenceUnit, Result, Session, SessionConfig, SessionFactory, SqliteConfig,
        SqliteConnection, Time, Timestamp, TransactionStatus, Value,
    };
}
