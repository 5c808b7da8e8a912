//! Session registry: one live session per configured tool server.

use std::sync::Arc;

use toolmux_core::{ServerSpec, SessionConnector, SessionError, ToolSession};

/// Registry lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),
}

/// A configured server that could not be brought up.
#[derive(Debug)]
pub struct OpenFailure {
    pub identity: String,
    pub error: SessionError,
}

/// Owns the sessions of every configured tool server.
///
/// Sessions are acquired in configuration order and released in reverse
/// order by [`SessionRegistry::close`]. Lookups never lock; the session list
/// only changes during open and close.
pub struct SessionRegistry {
    /// Initialized sessions, addressable by identity.
    live: Vec<(String, Arc<dyn ToolSession>)>,
    /// Every session that was spawned, including ones that failed to
    /// initialize. This is the teardown list.
    acquired: Vec<(String, Arc<dyn ToolSession>)>,
    failures: Vec<OpenFailure>,
}

impl SessionRegistry {
    /// Spawn and initialize one session per spec, in order.
    ///
    /// A spec that fails to spawn or initialize is recorded in
    /// [`failures`](Self::failures) and left out of the registry. Duplicate
    /// identities after the first are rejected the same way.
    pub async fn open<C>(connector: &C, specs: &[ServerSpec]) -> Self
    where
        C: SessionConnector + ?Sized,
    {
        let mut registry = Self::new();
        registry.open_all(connector, specs).await;
        registry
    }

    /// Like [`open`](Self::open), but fills an existing registry.
    ///
    /// Each session is recorded for teardown as soon as it is spawned, so if
    /// this future is cancelled part-way, [`close`](Self::close) still
    /// releases everything started so far.
    pub async fn open_all<C>(&mut self, connector: &C, specs: &[ServerSpec])
    where
        C: SessionConnector + ?Sized,
    {
        for spec in specs {
            if self.contains(&spec.name)
                || self.failures.iter().any(|f| f.identity == spec.name)
            {
                tracing::warn!(server = %spec.name, "Duplicate server identity ignored");
                self.failures.push(OpenFailure {
                    identity: spec.name.clone(),
                    error: SessionError::SpawnFailed(format!(
                        "duplicate server identity '{}'",
                        spec.name
                    )),
                });
                continue;
            }

            let session = match connector.connect(spec).await {
                Ok(session) => session,
                Err(error) => {
                    tracing::warn!(server = %spec.name, "Failed to start tool server: {error}");
                    self.failures.push(OpenFailure {
                        identity: spec.name.clone(),
                        error,
                    });
                    continue;
                }
            };
            self
                .acquired
                .push((spec.name.clone(), Arc::clone(&session)));

            let handshake =
                tokio::time::timeout(spec.init_timeout(), session.initialize()).await;
            let result = handshake.unwrap_or_else(|_| {
                Err(SessionError::Timeout {
                    operation: "initialize".to_string(),
                    after: spec.init_timeout(),
                })
            });

            match result {
                Ok(()) => {
                    tracing::info!(server = %spec.name, "Tool server ready");
                    self.live.push((spec.name.clone(), session));
                }
                Err(error) => {
                    tracing::warn!(server = %spec.name, "Tool server failed to initialize: {error}");
                    self.failures.push(OpenFailure {
                        identity: spec.name.clone(),
                        error,
                    });
                }
            }
        }
    }

    /// Registry over sessions that are already initialized.
    #[must_use]
    pub fn from_sessions<I, S>(sessions: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn ToolSession>)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (identity, session) in sessions {
            let identity = identity.into();
            if registry.contains(&identity) {
                continue;
            }
            registry
                .acquired
                .push((identity.clone(), Arc::clone(&session)));
            registry.live.push((identity, session));
        }
        registry
    }

    /// Registry with no sessions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            live: Vec::new(),
            acquired: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Session for `identity`.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownServer`] if no live session has that
    /// identity.
    pub fn get(&self, identity: &str) -> Result<&Arc<dyn ToolSession>, RegistryError> {
        self.live
            .iter()
            .find(|(name, _)| name == identity)
            .map(|(_, session)| session)
            .ok_or_else(|| RegistryError::UnknownServer(identity.to_string()))
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.live.iter().any(|(name, _)| name == identity)
    }

    /// Live identities in acquisition order.
    #[must_use]
    pub fn identities(&self) -> Vec<&str> {
        self.live.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Live sessions in acquisition order.
    pub fn sessions(&self) -> impl Iterator<Item = (&str, &Arc<dyn ToolSession>)> {
        self.live.iter().map(|(name, session)| (name.as_str(), session))
    }

    /// Servers that could not be opened.
    #[must_use]
    pub fn failures(&self) -> &[OpenFailure] {
        &self.failures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Shut down every acquired session, newest first.
    ///
    /// Teardown failures are logged and do not stop the remaining
    /// shutdowns. The registry is empty afterwards.
    pub async fn close(&mut self) {
        self.live.clear();
        while let Some((identity, session)) = self.acquired.pop() {
            match session.shutdown().await {
                Ok(()) => tracing::info!(server = %identity, "Tool server closed"),
                Err(e) => tracing::warn!(server = %identity, "Tool server shutdown failed: {e}"),
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            tracing::warn!(
                sessions = self.acquired.len(),
                "Session registry dropped without close"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{FakeConnector, FakeSession, ShutdownLog, spec};

    #[tokio::test]
    async fn test_open_in_order_and_lookup() {
        let connector = FakeConnector::default()
            .with(&Arc::new(FakeSession::new("alpha")))
            .with(&Arc::new(FakeSession::new("beta")));

        let mut registry = SessionRegistry::open(&connector, &[spec("alpha"), spec("beta")]).await;
        assert_eq!(registry.identities(), ["alpha", "beta"]);
        assert!(registry.failures().is_empty());
        assert!(registry.get("beta").is_ok());
        assert_eq!(
            registry.get("gamma").err(),
            Some(RegistryError::UnknownServer("gamma".into()))
        );

        registry.close().await;
        assert!(registry.is_empty());
        assert!(registry.get("alpha").is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let connector = FakeConnector::default().with(&Arc::new(FakeSession::new("alpha")));

        let mut registry =
            SessionRegistry::open(&connector, &[spec("missing"), spec("alpha")]).await;
        assert_eq!(registry.identities(), ["alpha"]);
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].identity, "missing");
        assert!(matches!(
            registry.failures()[0].error,
            SessionError::SpawnFailed(_)
        ));
        registry.close().await;
    }

    #[tokio::test]
    async fn test_close_reverse_order_including_failed_init() {
        let log: ShutdownLog = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector::default()
            .with(&Arc::new(FakeSession::new("a").logging_shutdown(&log)))
            .with(&Arc::new(
                FakeSession::new("b").failing_init().logging_shutdown(&log),
            ))
            .with(&Arc::new(
                FakeSession::new("c").failing_shutdown().logging_shutdown(&log),
            ));

        let mut registry =
            SessionRegistry::open(&connector, &[spec("a"), spec("b"), spec("c")]).await;
        assert_eq!(registry.identities(), ["a", "c"]);
        assert_eq!(registry.failures()[0].identity, "b");

        registry.close().await;
        // "c" fails to shut down; the rest still run.
        assert_eq!(*log.lock().unwrap(), ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_cancelled_open_still_closes_started_sessions() {
        let log: ShutdownLog = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector::default()
            .with(&Arc::new(FakeSession::new("a").logging_shutdown(&log)))
            .with(&Arc::new(
                FakeSession::new("b").hanging_init().logging_shutdown(&log),
            ))
            .with(&Arc::new(FakeSession::new("c").logging_shutdown(&log)));

        let mut registry = SessionRegistry::new();
        let specs = [spec("a"), spec("b"), spec("c")];
        let opening = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            registry.open_all(&connector, &specs),
        );
        assert!(opening.await.is_err());
        assert_eq!(registry.identities(), ["a"]);

        registry.close().await;
        assert_eq!(*log.lock().unwrap(), ["b", "a"]);
        assert_eq!(
            connector.connects.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn test_duplicate_identity_first_wins() {
        let connector = FakeConnector::default().with(&Arc::new(FakeSession::new("alpha")));

        let mut registry = SessionRegistry::open(&connector, &[spec("alpha"), spec("alpha")]).await;
        assert_eq!(registry.identities(), ["alpha"]);
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(
            connector.connects.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        registry.close().await;
    }

    #[tokio::test]
    async fn test_from_sessions() {
        let alpha: Arc<dyn ToolSession> = Arc::new(FakeSession::new("alpha").ready());
        let mut registry = SessionRegistry::from_sessions([("alpha", alpha)]);
        assert!(registry.contains("alpha"));
        assert_eq!(registry.len(), 1);
        registry.close().await;
    }
}
