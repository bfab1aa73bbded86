//! Control: the in-process session registry.
//!
//! One [`Control`] per broker process maps session ids to live [`Session`]s.
//! An id is in the registry exactly while this broker holds its claim in the
//! Session Directory: [`Control::create_session`] claims before inserting, and
//! [`Control::destroy_session`] removes before releasing.
//!
//! # Why `DashMap`?
//!
//! Attach requests for different sessions arrive on different tasks.  A
//! sharded concurrent map lets them look up and insert without one global
//! lock, and no map guard is ever held while a session's own lock is taken.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tether_core::{BrokerIdentity, ClaimToken, DirectoryEntry, SessionId, StatusSummary};

use crate::application::directory::{ClaimOutcome, DirectoryError, SessionDirectory};
use crate::application::session::Session;

/// Errors from [`Control::create_session`].
#[derive(Debug, Error)]
pub enum ControlError {
    /// The id is owned already, by this broker or another one.
    #[error("session \"{0}\" already exists")]
    SessionExists(SessionId),

    /// The Session Directory could not answer.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Registry of the sessions this broker instance owns.
pub struct Control {
    directory: Arc<dyn SessionDirectory>,
    identity: BrokerIdentity,
    sessions: DashMap<SessionId, Arc<Session>>,
    wait_pulse_interval: Duration,
}

impl Control {
    pub fn new(
        directory: Arc<dyn SessionDirectory>,
        identity: BrokerIdentity,
        wait_pulse_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            identity,
            sessions: DashMap::new(),
            wait_pulse_interval,
        })
    }

    /// Identity written into every directory claim.
    pub fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    /// Connects to the Session Directory and provisions its schema.
    pub async fn init(&self) -> Result<(), DirectoryError> {
        self.directory.provision().await
    }

    /// Calls [`Control::init`] until it succeeds, sleeping `delay` between
    /// attempts.  Never gives up.
    pub async fn init_with_retry(&self, delay: Duration) {
        let mut attempt: u32 = 1;
        loop {
            match self.init().await {
                Ok(()) => {
                    info!(attempt, "session directory ready");
                    return;
                }
                Err(e) => {
                    error!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "session directory init failed: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Claims `id` in the Session Directory and registers a new session.
    ///
    /// # Errors
    ///
    /// - [`ControlError::SessionExists`] if the id is live locally or the
    ///   directory reports a conflict.
    /// - [`ControlError::Directory`] if the directory itself failed.
    pub async fn create_session(
        self: &Arc<Self>,
        id: &SessionId,
    ) -> Result<Arc<Session>, ControlError> {
        if self.sessions.contains_key(id) {
            debug!(session_id = %id, "claim refused: already live on this broker");
            return Err(ControlError::SessionExists(id.clone()));
        }

        let entry = DirectoryEntry {
            session_id: id.to_string(),
            broker: self.identity.clone(),
        };
        let token = match self.directory.claim(&entry).await? {
            ClaimOutcome::Granted(token) => token,
            ClaimOutcome::Conflict => {
                info!(session_id = %id, "claim refused: directory entry exists");
                return Err(ControlError::SessionExists(id.clone()));
            }
        };

        let session = Session::new(
            id.clone(),
            token,
            Arc::downgrade(self),
            self.wait_pulse_interval,
        );
        self.sessions.insert(id.clone(), Arc::clone(&session));
        info!(session_id = %id, "session claimed");
        Ok(session)
    }

    /// Looks up a live session.
    pub fn get_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Deregisters a session and releases its directory claim in the
    /// background.
    ///
    /// The registry entry is removed only if it still belongs to the claim
    /// identified by `token`.  A failed release is logged and not retried.
    pub fn destroy_session(&self, id: &SessionId, token: &ClaimToken) {
        if self
            .sessions
            .remove_if(id, |_, session| session.token() == token)
            .is_none()
        {
            debug!(session_id = %id, "destroy: session was not registered");
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %id, "no async runtime; directory claim left behind");
            return;
        };
        let directory = Arc::clone(&self.directory);
        let id = id.clone();
        let token = token.clone();
        runtime.spawn(async move {
            match directory.release(id.as_str(), &token).await {
                Ok(()) => info!(session_id = %id, "claim released"),
                Err(e) => error!(session_id = %id, "failed to release claim: {e}"),
            }
        });
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of every live session, oldest first.
    pub fn status_summary(&self) -> StatusSummary {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut summaries: Vec<_> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        StatusSummary {
            sessions: summaries,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::directory::MockSessionDirectory;
    use crate::application::link::link;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tether_core::SessionState;

    /// In-memory directory that counts calls, so tests can assert on
    /// exactly-once release.
    #[derive(Default)]
    struct CountingDirectory {
        entries: Mutex<HashMap<String, ClaimToken>>,
        claims: AtomicUsize,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl SessionDirectory for CountingDirectory {
        async fn provision(&self) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn claim(&self, entry: &DirectoryEntry) -> Result<ClaimOutcome, DirectoryError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&entry.session_id) {
                return Ok(ClaimOutcome::Conflict);
            }
            let token = ClaimToken::generate();
            entries.insert(entry.session_id.clone(), token.clone());
            Ok(ClaimOutcome::Granted(token))
        }

        async fn release(&self, session_id: &str, token: &ClaimToken) -> Result<(), DirectoryError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            if entries.get(session_id) == Some(token) {
                entries.remove(session_id);
            }
            Ok(())
        }
    }

    fn identity() -> BrokerIdentity {
        BrokerIdentity {
            host: "broker-test".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            port: 8381,
        }
    }

    fn control_with(directory: Arc<dyn SessionDirectory>) -> Arc<Control> {
        Control::new(directory, identity(), Duration::from_secs(2))
    }

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_identity_is_the_one_given_at_construction() {
        let control = control_with(Arc::new(CountingDirectory::default()));
        assert_eq!(control.identity().host, "broker-test");
        assert_eq!(control.identity().port, 8381);
    }

    #[tokio::test]
    async fn test_create_session_registers_and_claims() {
        // Arrange
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());

        // Act
        let session = control.create_session(&id("abc123")).await.unwrap();

        // Assert
        assert_eq!(session.state(), SessionState::WaitingForMaster);
        assert!(control.get_session(&id("ABC123")).is_some());
        assert_eq!(directory.claims.load(Ordering::SeqCst), 1);
        assert_eq!(control.session_count(), 1);
    }

    #[tokio::test]
    async fn test_local_duplicate_fails_without_touching_directory() {
        // Arrange
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());
        control.create_session(&id("abc123")).await.unwrap();

        // Act
        let err = control.create_session(&id("abc123")).await.unwrap_err();

        // Assert
        assert!(matches!(err, ControlError::SessionExists(_)));
        assert_eq!(directory.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_conflict_is_session_exists() {
        // Arrange: another broker owns the id
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_claim()
            .returning(|_| Ok(ClaimOutcome::Conflict));
        let control = control_with(Arc::new(directory));

        // Act
        let err = control.create_session(&id("abc123")).await.unwrap_err();

        // Assert
        assert_eq!(err.to_string(), "session \"abc123\" already exists");
        assert_eq!(control.session_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_reported_as_conflict() {
        // Arrange
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_claim()
            .returning(|_| Err(DirectoryError::Unavailable("connection refused".into())));
        let control = control_with(Arc::new(directory));

        // Act
        let result = control.create_session(&id("abc123")).await;

        // Assert
        assert!(matches!(
            result,
            Err(ControlError::Directory(DirectoryError::Unavailable(_)))
        ));
        assert!(control.get_session(&id("abc123")).is_none());
    }

    #[tokio::test]
    async fn test_claim_carries_broker_identity() {
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_claim()
            .withf(|entry| entry.session_id == "abc123" && entry.broker.host == "broker-test")
            .times(1)
            .returning(|_| Ok(ClaimOutcome::Granted(ClaimToken::from_string("etag-1"))));
        let control = control_with(Arc::new(directory));

        let session = control.create_session(&id("ABC123")).await.unwrap();
        assert_eq!(session.token().as_str(), "etag-1");
    }

    #[tokio::test]
    async fn test_destroy_removes_then_releases() {
        // Arrange
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());
        let session = control.create_session(&id("abc123")).await.unwrap();

        // Act
        control.destroy_session(session.id(), session.token());
        settle().await;

        // Assert
        assert!(control.get_session(&id("abc123")).is_none());
        assert_eq!(directory.releases.load(Ordering::SeqCst), 1);
        assert!(directory.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_with_stale_token_keeps_newer_session() {
        // Arrange
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());
        let session = control.create_session(&id("abc123")).await.unwrap();

        // Act
        control.destroy_session(session.id(), &ClaimToken::from_string("stale"));
        settle().await;

        // Assert: registry and directory entry both survive
        assert!(control.get_session(&id("abc123")).is_some());
        assert_eq!(directory.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abandon_twice_releases_once() {
        // Arrange
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());
        let session = control.create_session(&id("abc123")).await.unwrap();
        let (master, _remote) = link();
        session.attach_master(master).unwrap();

        // Act
        session.abandon();
        session.abandon();
        settle().await;

        // Assert
        assert_eq!(directory.releases.load(Ordering::SeqCst), 1);
        assert_eq!(control.session_count(), 0);
    }

    #[tokio::test]
    async fn test_id_is_reusable_after_destroy() {
        let directory = Arc::new(CountingDirectory::default());
        let control = control_with(directory.clone());
        let first = control.create_session(&id("abc123")).await.unwrap();
        first.abandon();
        settle().await;

        let second = control.create_session(&id("abc123")).await.unwrap();
        assert_ne!(first.token(), second.token());
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        // Arrange
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_claim()
            .returning(|_| Ok(ClaimOutcome::Granted(ClaimToken::generate())));
        directory
            .expect_release()
            .times(1)
            .returning(|_, _| Err(DirectoryError::Store("disk I/O error".into())));
        let control = control_with(Arc::new(directory));
        let session = control.create_session(&id("abc123")).await.unwrap();

        // Act
        session.abandon();
        settle().await;

        // Assert: deregistered regardless
        assert_eq!(control.session_count(), 0);
    }

    #[tokio::test]
    async fn test_status_summary_lists_live_sessions() {
        // Arrange
        let control = control_with(Arc::new(CountingDirectory::default()));
        let a = control.create_session(&id("aaa")).await.unwrap();
        control.create_session(&id("bbb")).await.unwrap();
        let (master, _remote) = link();
        a.attach_master(master).unwrap();

        // Act
        let summary = control.status_summary();

        // Assert
        assert_eq!(summary.sessions.len(), 2);
        let aaa = summary.sessions.iter().find(|s| s.id == "aaa").unwrap();
        assert_eq!(aaa.state, SessionState::WaitingForSlave);
        assert!(aaa.has_master);
        assert!(!aaa.has_slave);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_with_retry_keeps_trying_until_provisioned() {
        // Arrange: the store is down for the first two attempts
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let mut directory = MockSessionDirectory::new();
        directory.expect_provision().times(3).returning(move || {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DirectoryError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        });
        let control = control_with(Arc::new(directory));

        // Act
        let started = tokio::time::Instant::now();
        control.init_with_retry(Duration::from_secs(5)).await;

        // Assert
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
