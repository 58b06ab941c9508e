use crate::gateway::QueryGateway;
use crate::metrics_defs::{DB_CONNECTED, DB_RECONNECT_ATTEMPTS, DB_RECONNECT_FAILURES};
use crate::retry::{RetryPolicy, retry};
use crate::store::{Connector, Param, Row, Session, StoreError};
use async_trait::async_trait;
use shared::{counter, gauge};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

/// Owns the single shared store session.
///
/// The session sits behind one async mutex. Reconnecting and every query take that
/// mutex, so a query never runs while the session is being replaced and the session is
/// never used by two queries at once.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Box<dyn Session>>>,
    // Last known state, for the readiness check. Never consulted on the query path.
    ready: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        ConnectionSupervisor {
            connector,
            session: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Makes sure a valid session is installed.
    ///
    /// Returns `true` right away if the current session passes its liveness check.
    /// Otherwise the stale session is dropped and up to `policy.max_attempts` connection
    /// attempts are made. Returns `false` once they are all exhausted, leaving no session
    /// installed.
    pub async fn ensure(&self, policy: &RetryPolicy) -> bool {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref()
            && session.is_valid().await
        {
            self.ready.store(true, Ordering::Relaxed);
            return true;
        }

        if slot.take().is_some() {
            tracing::warn!("Database session is no longer valid, reconnecting");
        }

        let target = self.connector.describe();
        let result = retry(policy, |attempt| {
            let connector = &self.connector;
            let target = &target;
            async move {
                counter!(DB_RECONNECT_ATTEMPTS).increment(1);
                connector.connect().await.inspect_err(|err| {
                    counter!(DB_RECONNECT_FAILURES).increment(1);
                    tracing::warn!(
                        "Connection attempt {} to {target} failed: {err}",
                        attempt + 1
                    );
                })
            }
        })
        .await;

        let connected = match result {
            Ok(session) => {
                *slot = Some(session);
                tracing::info!("Connected to database at {target}");
                true
            }
            Err(_) => {
                tracing::error!(
                    "Could not connect to database at {target} after {} attempts",
                    policy.max_attempts
                );
                false
            }
        };

        self.ready.store(connected, Ordering::Relaxed);
        gauge!(DB_CONNECTED).set(if connected { 1.0 } else { 0.0 });
        connected
    }

    /// Locks the session for one unit of store work.
    ///
    /// Fails with [`StoreError::Closed`] if no session is installed. The returned guard
    /// holds the supervisor lock until dropped.
    pub async fn session(&self) -> Result<SessionGuard<'_>, StoreError> {
        let slot = self.session.lock().await;
        match MutexGuard::try_map(slot, |slot| slot.as_mut()) {
            Ok(session) => Ok(SessionGuard {
                session,
                ready: &self.ready,
            }),
            Err(_) => {
                self.ready.store(false, Ordering::Relaxed);
                Err(StoreError::Closed)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Exclusive access to the live session.
///
/// Statements run through the guard; one that finds the session closed marks the
/// supervisor as not ready until the next successful `ensure`.
pub struct SessionGuard<'a> {
    session: MappedMutexGuard<'a, Box<dyn Session>>,
    ready: &'a AtomicBool,
}

impl SessionGuard<'_> {
    pub fn gateway(&self) -> QueryGateway<'_> {
        QueryGateway::new(self)
    }

    fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(StoreError::Closed) = &result
            && self.ready.swap(false, Ordering::Relaxed)
        {
            tracing::warn!("Database session closed while in use");
            gauge!(DB_CONNECTED).set(0.0);
        }
        result
    }
}

#[async_trait]
impl Session for SessionGuard<'_> {
    async fn is_valid(&self) -> bool {
        self.session.is_valid().await
    }

    async fn query(&self, statement: &str, params: &[Param]) -> Result<Vec<Row>, StoreError> {
        self.observe(self.session.query(statement, params).await)
    }

    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64, StoreError> {
        self.observe(self.session.execute(statement, params).await)
    }
}
