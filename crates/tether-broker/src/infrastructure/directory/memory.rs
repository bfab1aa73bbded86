//! Process-local Session Directory.
//!
//! Exclusive only within one process, so it suits a single broker instance
//! and tests.  Run several instances against the SQLite backend instead.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use tether_core::{ClaimToken, DirectoryEntry};

use crate::application::directory::{ClaimOutcome, DirectoryError, SessionDirectory};

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: Mutex<HashMap<String, (ClaimToken, DirectoryEntry)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if an entry exists for `session_id`.
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (ClaimToken, DirectoryEntry)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionDirectory for MemoryDirectory {
    async fn provision(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn claim(&self, entry: &DirectoryEntry) -> Result<ClaimOutcome, DirectoryError> {
        let mut entries = self.lock();
        if entries.contains_key(&entry.session_id) {
            return Ok(ClaimOutcome::Conflict);
        }
        let token = ClaimToken::generate();
        entries.insert(entry.session_id.clone(), (token.clone(), entry.clone()));
        Ok(ClaimOutcome::Granted(token))
    }

    async fn release(&self, session_id: &str, token: &ClaimToken) -> Result<(), DirectoryError> {
        let mut entries = self.lock();
        match entries.get(session_id) {
            Some((current, _)) if current == token => {
                entries.remove(session_id);
            }
            Some(_) => debug!(session_id, "release skipped: version token mismatch"),
            None => debug!(session_id, "release skipped: no entry"),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_core::BrokerIdentity;

    fn entry(id: &str) -> DirectoryEntry {
        DirectoryEntry {
            session_id: id.to_string(),
            broker: BrokerIdentity {
                host: "broker-0".into(),
                ip: "10.0.0.1".parse().unwrap(),
                port: 8381,
            },
        }
    }

    #[tokio::test]
    async fn test_second_claim_conflicts() {
        // Arrange
        let dir = MemoryDirectory::new();

        // Act
        let first = dir.claim(&entry("abc123")).await.unwrap();
        let second = dir.claim(&entry("abc123")).await.unwrap();

        // Assert
        assert!(first.is_granted());
        assert_eq!(second, ClaimOutcome::Conflict);
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn test_release_with_matching_token_removes_entry() {
        let dir = MemoryDirectory::new();
        let ClaimOutcome::Granted(token) = dir.claim(&entry("abc123")).await.unwrap() else {
            panic!("expected a grant");
        };

        dir.release("abc123", &token).await.unwrap();

        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn test_release_with_stale_token_is_tolerated_and_keeps_entry() {
        let dir = MemoryDirectory::new();
        dir.claim(&entry("abc123")).await.unwrap();

        let result = dir
            .release("abc123", &ClaimToken::from_string("stale"))
            .await;

        assert!(result.is_ok());
        assert!(dir.contains("abc123"));
    }

    #[tokio::test]
    async fn test_release_of_missing_entry_is_ok() {
        let dir = MemoryDirectory::new();
        assert!(dir
            .release("ghost", &ClaimToken::generate())
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_grant_exactly_one() {
        // Arrange
        let dir = Arc::new(MemoryDirectory::new());

        // Act: sixteen racing claims for the same id
        let mut handles = Vec::new();
        for _ in 0..16 {
            let dir = Arc::clone(&dir);
            handles.push(tokio::spawn(async move {
                dir.claim(&entry("race")).await.unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_granted() {
                granted += 1;
            }
        }

        // Assert
        assert_eq!(granted, 1);
    }
}
