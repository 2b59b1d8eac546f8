//! Transaction state machine over one connection.
//!
//! ```text
//! NotActive --begin--> Active --commit ok--> Committed
//!                        |   --commit err--> FailedCommit
//!                        |                     |
//!                        +---rollback----------+--ok--> RolledBack
//!                                                 err--> FailedRollback
//! ```

use std::fmt;
use unitwork_core::error::{TransactionError, TransactionErrorKind};
use unitwork_core::{Connection, Error, Result};

/// Lifecycle status of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    NotActive,
    Active,
    Committed,
    RolledBack,
    FailedCommit,
    FailedRollback,
}

impl TransactionStatus {
    /// Whether no further transition is defined from this status.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed
                | TransactionStatus::RolledBack
                | TransactionStatus::FailedRollback
        )
    }

    /// Whether `rollback` is legal from this status.
    pub const fn can_rollback(self) -> bool {
        matches!(
            self,
            TransactionStatus::Active | TransactionStatus::FailedCommit
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::NotActive => "NOT_ACTIVE",
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RolledBack => "ROLLED_BACK",
            TransactionStatus::FailedCommit => "FAILED_COMMIT",
            TransactionStatus::FailedRollback => "FAILED_ROLLBACK",
        };
        f.write_str(name)
    }
}

/// A single transaction boundary on the session's connection.
#[derive(Debug)]
pub struct Transaction {
    status: TransactionStatus,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            status: TransactionStatus::NotActive,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Leave autocommit mode. Legal only from `NotActive`.
    pub fn begin<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        match self.status {
            TransactionStatus::NotActive => {}
            TransactionStatus::Active => {
                return Err(Error::illegal_state("Transaction is already active"));
            }
            other => {
                return Err(Error::illegal_state(format!(
                    "Cannot begin transaction with status {}",
                    other
                )));
            }
        }
        conn.begin()?;
        self.status = TransactionStatus::Active;
        tracing::debug!("Transaction started");
        Ok(())
    }

    /// Commit. Legal only from `Active`; a failed commit leaves the
    /// transaction in `FailedCommit`, open for a rollback.
    pub fn commit<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        if self.status != TransactionStatus::Active {
            return Err(Error::illegal_state("Cannot commit not active transaction"));
        }
        match conn.commit() {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                tracing::debug!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.status = TransactionStatus::FailedCommit;
                tracing::error!(error = %e, "Transaction commit failed");
                Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::Commit,
                    message: "Error occurred while transaction committing".to_string(),
                    source: Some(Box::new(e)),
                }))
            }
        }
    }

    /// Roll back. Legal from `Active` or `FailedCommit`; a failed rollback
    /// is terminal.
    pub fn rollback<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        if !self.status.can_rollback() {
            return Err(Error::illegal_state(format!(
                "Cannot rollback transaction with status {}",
                self.status
            )));
        }
        match conn.rollback() {
            Ok(()) => {
                self.status = TransactionStatus::RolledBack;
                tracing::debug!("Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                self.status = TransactionStatus::FailedRollback;
                tracing::error!(error = %e, "Transaction rollback failed");
                Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::Rollback,
                    message: "Error occurred while transaction rollback".to_string(),
                    source: Some(Box::new(e)),
                }))
            }
        }
    }

    /// Record a failure that happened while committing, before the
    /// underlying commit was reached.
    pub(crate) fn mark_failed_commit(&mut self) {
        if self.status == TransactionStatus::Active {
            self.status = TransactionStatus::FailedCommit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockConnection;

    #[test]
    fn test_happy_path() {
        let (mut conn, state) = MockConnection::new();
        let mut tx = Transaction::new();
        assert_eq!(tx.status(), TransactionStatus::NotActive);
        tx.begin(&mut conn).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Active);
        tx.commit(&mut conn).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_commit_before_begin_is_illegal() {
        let (mut conn, state) = MockConnection::new();
        let mut tx = Transaction::new();
        let err = tx.commit(&mut conn).unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(err.to_string(), "Cannot commit not active transaction");
        assert!(state.lock().unwrap().log.is_empty());
    }

    #[test]
    fn test_begin_twice_is_illegal() {
        let (mut conn, state) = MockConnection::new();
        let mut tx = Transaction::new();
        tx.begin(&mut conn).unwrap();
        let err = tx.begin(&mut conn).unwrap_err();
        assert_eq!(err.to_string(), "Transaction is already active");
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN"]);
    }

    #[test]
    fn test_begin_after_commit_is_illegal() {
        let (mut conn, _state) = MockConnection::new();
        let mut tx = Transaction::new();
        tx.begin(&mut conn).unwrap();
        tx.commit(&mut conn).unwrap();
        let err = tx.begin(&mut conn).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot begin transaction with status COMMITTED"
        );
    }

    #[test]
    fn test_failed_commit_then_rollback() {
        let (mut conn, state) = MockConnection::new();
        state.lock().unwrap().fail_commit = true;
        let mut tx = Transaction::new();
        tx.begin(&mut conn).unwrap();

        let err = tx.commit(&mut conn).unwrap_err();
        assert!(err.is_storage());
        assert_eq!(
            err.to_string(),
            "Transaction error: Error occurred while transaction committing"
        );
        assert_eq!(tx.status(), TransactionStatus::FailedCommit);

        tx.rollback(&mut conn).unwrap();
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
    }

    #[test]
    fn test_failed_rollback_is_terminal() {
        let (mut conn, state) = MockConnection::new();
        state.lock().unwrap().fail_rollback = true;
        let mut tx = Transaction::new();
        tx.begin(&mut conn).unwrap();
        assert!(tx.rollback(&mut conn).is_err());
        assert_eq!(tx.status(), TransactionStatus::FailedRollback);
        assert!(tx.status().is_terminal());

        let err = tx.rollback(&mut conn).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot rollback transaction with status FAILED_ROLLBACK"
        );
    }

    #[test]
    fn test_rollback_when_not_active_is_illegal() {
        let (mut conn, _state) = MockConnection::new();
        let mut tx = Transaction::new();
        assert!(tx.rollback(&mut conn).unwrap_err().is_illegal_state());
    }
}
