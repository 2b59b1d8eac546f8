//! Session factory and scoped helpers.
//!
//! A [`SessionFactory`] owns the entity registry and a [`ConnectionSource`];
//! each session it opens gets a fresh connection. The scoped helpers
//! guarantee the session is closed on every exit path.

use crate::registry::EntityRegistry;
use crate::{Session, SessionConfig};
use std::fmt;
use std::sync::Arc;
use unitwork_core::error::{TransactionError, TransactionErrorKind};
use unitwork_core::{ConnectionSource, Entity, Error, Result};

type Registration = fn(&mut EntityRegistry) -> Result<()>;

/// Builder for [`SessionFactory`].
///
/// Registration errors are reported by [`build`](Self::build).
pub struct SessionFactoryBuilder<S: ConnectionSource> {
    source: S,
    registrations: Vec<Registration>,
    config: SessionConfig,
}

impl<S: ConnectionSource> SessionFactoryBuilder<S> {
    /// Register an entity type.
    pub fn register<E: Entity>(mut self) -> Self {
        self.registrations.push(EntityRegistry::register::<E>);
        self
    }

    /// Configuration for every session opened by the factory.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate every registered type and build the factory.
    pub fn build(self) -> Result<SessionFactory<S>> {
        let mut registry = EntityRegistry::new();
        for register in &self.registrations {
            register(&mut registry)?;
        }
        tracing::info!(entities = registry.len(), "Session factory created");
        Ok(SessionFactory {
            source: self.source,
            registry: Arc::new(registry),
            config: self.config,
        })
    }
}

/// Opens sessions that share one entity registry.
pub struct SessionFactory<S: ConnectionSource> {
    source: S,
    registry: Arc<EntityRegistry>,
    config: SessionConfig,
}

impl<S: ConnectionSource> SessionFactory<S> {
    pub fn builder(source: S) -> SessionFactoryBuilder<S> {
        SessionFactoryBuilder {
            source,
            registrations: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Build a factory around an already populated registry.
    pub fn new(source: S, registry: EntityRegistry, config: SessionConfig) -> Self {
        Self {
            source,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session on a fresh connection.
    pub fn open_session(&self) -> Result<Session<S::Connection>> {
        tracing::info!("Creating session...");
        let connection = self.source.connect()?;
        Ok(Session::with_config(
            connection,
            Arc::clone(&self.registry),
            self.config.clone(),
        ))
    }

    /// Run `f` in a new session and close it afterwards.
    ///
    /// The session is closed whether or not `f` succeeds. An error from `f`
    /// takes precedence; a close error after it is only logged.
    pub fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session<S::Connection>) -> Result<T>,
    {
        let mut session = self.open_session()?;
        let result = f(&mut session);
        let closed = session.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(error = %close_err, "Failed to close session after error");
                Err(e)
            }
        }
    }

    /// Run `f` inside a transaction in a new session.
    ///
    /// Commits when `f` returns `Ok`. If `f` or the commit fails the
    /// transaction is rolled back and a `RolledBack` transaction error
    /// carrying the original failure is returned.
    pub fn run_within_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session<S::Connection>) -> Result<T>,
    {
        self.with_session(|session| {
            session.begin()?;
            let outcome = f(session).and_then(|value| session.commit().map(|()| value));
            outcome.or_else(|e| {
                if let Err(rollback_err) = session.rollback() {
                    tracing::error!(error = %rollback_err, "Rollback after failure failed");
                }
                Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::RolledBack,
                    message: "Transaction is rolled back".to_string(),
                    source: Some(Box::new(e)),
                }))
            })
        })
    }
}

impl<S: ConnectionSource> fmt::Debug for SessionFactory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entities", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockConnection, MockState, Product};
    use std::sync::Mutex;
    use unitwork_core::Value;

    fn factory() -> (
        SessionFactory<impl Fn() -> Result<MockConnection> + Send + Sync>,
        Arc<Mutex<Vec<Arc<Mutex<MockState>>>>>,
    ) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let opened = Arc::clone(&states);
        let source = move || -> Result<MockConnection> {
            let (conn, state) = MockConnection::new();
            opened.lock().unwrap().push(state);
            Ok(conn)
        };
        let factory = SessionFactory::builder(source)
            .register::<Product>()
            .build()
            .unwrap();
        (factory, states)
    }

    fn log(states: &Arc<Mutex<Vec<Arc<Mutex<MockState>>>>>, index: usize) -> Vec<&'static str> {
        states.lock().unwrap()[index].lock().unwrap().log.clone()
    }

    #[test]
    fn test_each_session_gets_its_own_connection() {
        let (factory, states) = factory();
        let mut a = factory.open_session().unwrap();
        let mut b = factory.open_session().unwrap();
        assert_eq!(states.lock().unwrap().len(), 2);
        a.close().unwrap();
        assert!(b.is_open());
        b.close().unwrap();
        assert_eq!(factory.registry().len(), 1);
    }

    #[test]
    fn test_build_reports_registration_errors() {
        #[derive(unitwork_macros::Entity)]
        struct NoId {
            name: String,
        }

        let err = SessionFactory::builder(|| -> Result<MockConnection> { Ok(MockConnection::new().0) })
            .register::<NoId>()
            .build()
            .unwrap_err();
        assert!(err.is_mapping());
    }

    #[test]
    fn test_with_session_always_closes() {
        let (factory, states) = factory();
        let value = factory.with_session(|_| Ok(5)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(log(&states, 0), vec!["CLOSE"]);

        let err = factory
            .with_session(|_| -> Result<()> { Err(Error::Custom("boom".into())) })
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(log(&states, 1), vec!["CLOSE"]);
    }

    #[test]
    fn test_run_within_tx_commits() {
        let (factory, states) = factory();
        factory
            .run_within_tx(|session| {
                session.save(Product {
                    id: None,
                    name: "tape".into(),
                    price: 0.5,
                })?;
                Ok(())
            })
            .unwrap();
        let state = Arc::clone(&states.lock().unwrap()[0]);
        let state = state.lock().unwrap();
        assert_eq!(state.log, vec!["BEGIN", "COMMIT", "CLOSE"]);
        assert_eq!(state.executed.len(), 1);
    }

    #[test]
    fn test_run_within_tx_rolls_back_on_error() {
        let (factory, states) = factory();
        let err = factory
            .run_within_tx(|session| -> Result<()> {
                session.save(Product {
                    id: None,
                    name: "tape".into(),
                    price: 0.5,
                })?;
                Err(Error::Custom("boom".into()))
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "Transaction error: Transaction is rolled back");
        let Error::Transaction(tx) = &err else {
            panic!("expected a transaction error, got {err:?}");
        };
        assert_eq!(tx.kind, TransactionErrorKind::RolledBack);
        assert_eq!(tx.source.as_ref().map(ToString::to_string), Some("boom".to_string()));

        let state = Arc::clone(&states.lock().unwrap()[0]);
        let state = state.lock().unwrap();
        assert_eq!(state.log, vec!["BEGIN", "ROLLBACK", "CLOSE"]);
        assert!(state.executed.is_empty());
    }

    #[test]
    fn test_run_within_tx_rolls_back_failed_commit() {
        let (conn, state) = MockConnection::new();
        state.lock().unwrap().fail_commit = true;
        let slot = Mutex::new(Some(conn));
        let factory = SessionFactory::builder(move || {
            slot.lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Custom("connection already used".into()))
        })
        .register::<Product>()
        .build()
        .unwrap();

        let err = factory
            .run_within_tx(|session| {
                session.update(
                    &Product {
                        id: Some(1),
                        name: String::new(),
                        price: 0.0,
                    },
                    [("price", Value::Double(1.0))],
                )
            })
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::RolledBack,
                ..
            })
        ));
        assert_eq!(state.lock().unwrap().log, vec!["BEGIN", "ROLLBACK", "CLOSE"]);
    }
}
