//! The Session Directory port.
//!
//! The directory is the distributed store that makes a session id globally
//! unique across broker instances.  The broker relies on exactly two
//! operations:
//!
//! - **claim**: create the entry *only if it does not exist*, returning a fresh
//!   version token;
//! - **release**: delete the entry *only if* its version token still matches.
//!
//! A claim that loses the race is [`ClaimOutcome::Conflict`], an ordinary
//! result.  Only store failures (unreachable, timed out, corrupt) are
//! [`DirectoryError`]s, so "someone else owns this" is never confused with
//! "the store is down".
//!
//! Implementations live in `infrastructure::directory`.

use async_trait::async_trait;
use thiserror::Error;

use tether_core::{ClaimToken, DirectoryEntry};

/// Store-level failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory was used before [`SessionDirectory::provision`] succeeded.
    #[error("session directory is not provisioned")]
    NotProvisioned,

    /// The backing store reported an error.
    #[error("session directory store error: {0}")]
    Store(String),

    /// The store could not be reached.
    #[error("session directory unavailable: {0}")]
    Unavailable(String),
}

/// Result of an exclusive create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The entry was created; keep the token to release it later.
    Granted(ClaimToken),
    /// An entry for this id already exists.
    Conflict,
}

impl ClaimOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ClaimOutcome::Granted(_))
    }
}

/// Exclusive-create / version-checked-delete store keyed by session id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Connects to the store and creates its schema.  Idempotent.
    async fn provision(&self) -> Result<(), DirectoryError>;

    /// Creates `entry` if no entry exists for its session id.
    async fn claim(&self, entry: &DirectoryEntry) -> Result<ClaimOutcome, DirectoryError>;

    /// Deletes the entry for `session_id` if it still carries `token`.
    ///
    /// A missing entry or a token mismatch is not an error.
    async fn release(&self, session_id: &str, token: &ClaimToken) -> Result<(), DirectoryError>;
}
