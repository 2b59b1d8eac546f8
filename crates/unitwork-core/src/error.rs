//! Error types shared by every unitwork crate.
//!
//! [`Error`] separates three audiences:
//!
//! - caller mistakes ([`UsageError`]): a null or invalid argument, or an
//!   operation on a closed session or finished transaction;
//! - storage failures ([`ConnectionError`], [`QueryError`], [`TransactionError`]),
//!   which keep the failing SQL and the driver's own error as `source`;
//! - mapping problems between rows and entity types ([`MappingError`], [`TypeError`]).

use std::error::Error as StdError;
use std::fmt;

type BoxedCause = Box<dyn StdError + Send + Sync>;

/// The error type of all unitwork operations.
#[derive(Debug)]
pub enum Error {
    Connection(ConnectionError),
    Query(QueryError),
    Type(TypeError),
    Transaction(TransactionError),
    Mapping(MappingError),
    Usage(UsageError),
    /// Storage returned something the session cannot reconcile.
    Consistency(String),
    Config(ConfigError),
    /// Raised by caller code running inside a scoped session or transaction.
    Custom(String),
}

/// Result type alias for unitwork operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    NullArgument,
    InvalidArgument,
    /// The operation is not legal in the current session or transaction state.
    IllegalState,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Connect,
    Close,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxedCause>,
}

/// Classification of a failed statement, derived from the driver's result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    /// Unique, not-null, check or foreign-key violation.
    Constraint,
    NotFound,
    Permission,
    DataTruncation,
    /// Another connection holds the lock.
    Busy,
    Database,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<BoxedCause>,
}

impl QueryError {
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    Commit,
    Rollback,
    /// A scoped unit of work failed and its transaction was rolled back.
    RolledBack,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
    /// The failure that ended the transaction.
    pub source: Option<Box<Error>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct MappingError {
    pub entity: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxedCause>,
}

impl Error {
    fn usage(kind: UsageErrorKind, message: String) -> Self {
        Error::Usage(UsageError { kind, message })
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::usage(UsageErrorKind::IllegalState, message.into())
    }

    /// A required argument was absent. The message names the argument.
    pub fn null_argument(argument: &str) -> Self {
        Self::usage(
            UsageErrorKind::NullArgument,
            format!("[{argument}] argument must be not null"),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::usage(UsageErrorKind::InvalidArgument, message.into())
    }

    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    fn has_usage_kind(&self, kind: UsageErrorKind) -> bool {
        matches!(self, Error::Usage(u) if u.kind == kind)
    }

    pub fn is_illegal_state(&self) -> bool {
        self.has_usage_kind(UsageErrorKind::IllegalState)
    }

    pub fn is_null_argument(&self) -> bool {
        self.has_usage_kind(UsageErrorKind::NullArgument)
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.has_usage_kind(UsageErrorKind::InvalidArgument)
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Error::Mapping(_))
    }

    /// Did the failure come from the database rather than the caller?
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Query(_) | Error::Transaction(_)
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.is_constraint_violation())
    }

    /// The statement behind this error, looking through transaction wrappers.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Transaction(t) => t.source.as_deref()?.sql(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {e}"),
            Error::Query(e) => write!(f, "Query error: {e}"),
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Transaction(e) => write!(f, "Transaction error: {e}"),
            Error::Mapping(e) => write!(f, "Mapping error: {e}"),
            Error::Consistency(msg) => write!(f, "Consistency error: {msg}"),
            Error::Config(e) => write!(f, "Configuration error: {e}"),
            Error::Usage(e) => fmt::Display::fmt(e, f),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.actual)?;
        if let Some(column) = &self.column {
            write!(f, " (column '{column}')")?;
        }
        Ok(())
    }
}

macro_rules! message_display {
    ($($ty:ident),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.message)
            }
        }
    )*};
}

message_display!(
    UsageError,
    ConnectionError,
    QueryError,
    TransactionError,
    MappingError,
    ConfigError
);

fn as_cause(cause: &Option<BoxedCause>) -> Option<&(dyn StdError + 'static)> {
    cause.as_deref().map(|c| c as &(dyn StdError + 'static))
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Connection(e) => as_cause(&e.source),
            Error::Query(e) => as_cause(&e.source),
            Error::Config(e) => as_cause(&e.source),
            Error::Transaction(e) => e.source.as_deref().map(|c| c as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}

macro_rules! wrap_variant {
    ($($variant:ident($ty:ty)),*) => {$(
        impl From<$ty> for Error {
            fn from(err: $ty) -> Self {
                Error::$variant(err)
            }
        }
    )*};
}

wrap_variant!(
    Connection(ConnectionError),
    Query(QueryError),
    Type(TypeError),
    Transaction(TransactionError),
    Mapping(MappingError),
    Usage(UsageError),
    Config(ConfigError)
);

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_violation() -> Error {
        QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO t VALUES (?)".to_string()),
            message: "UNIQUE constraint failed".to_string(),
            source: None,
        }
        .into()
    }

    #[test]
    fn test_usage_constructors_and_predicates() {
        let err = Error::null_argument("primaryKey");
        assert!(err.is_null_argument());
        assert!(!err.is_illegal_state());
        assert_eq!(err.to_string(), "[primaryKey] argument must be not null");

        let err = Error::illegal_state("Session is already closed");
        assert!(err.is_illegal_state());
        assert_eq!(err.to_string(), "Session is already closed");

        let err = Error::invalid_argument("[limit] argument cannot be negative number");
        assert!(err.is_invalid_argument());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_sql_is_found_through_transaction_wrapper() {
        let query = unique_violation();
        assert!(query.is_storage());
        assert!(query.is_constraint_violation());
        assert_eq!(query.to_string(), "Query error: UNIQUE constraint failed");

        let wrapped = Error::Transaction(TransactionError {
            kind: TransactionErrorKind::Commit,
            message: "Error occurred while transaction committing".to_string(),
            source: Some(Box::new(query)),
        });
        assert!(wrapped.is_storage());
        assert!(!wrapped.is_constraint_violation());
        assert_eq!(wrapped.sql(), Some("INSERT INTO t VALUES (?)"));
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn test_type_error_display_names_column() {
        let err = Error::Type(TypeError {
            expected: "i64",
            actual: "TEXT".to_string(),
            column: Some("price".to_string()),
        });
        assert_eq!(err.to_string(), "Type error: expected i64, found TEXT (column 'price')");
    }

    #[test]
    fn test_mapping_display() {
        let err = Error::mapping("Product", "Product does not have an id field");
        assert!(err.is_mapping());
        assert_eq!(err.to_string(), "Mapping error: Product does not have an id field");
    }
}
