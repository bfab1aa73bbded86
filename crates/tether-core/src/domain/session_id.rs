//! Session identifiers.
//!
//! A session id is chosen by the master and repeated by the slave.  Ids are
//! compared case-insensitively, so the canonical form is trimmed and
//! lower-cased once, at the boundary, and every later comparison is a plain
//! string comparison.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a raw session id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionIdError {
    /// The id was empty or consisted only of whitespace.
    #[error("must provide \"id\"")]
    Empty,
}

/// A normalised session identifier.
///
/// # Example
///
/// ```rust
/// use tether_core::SessionId;
///
/// let id = SessionId::parse("  ABC123 ").unwrap();
/// assert_eq!(id.as_str(), "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Parses and normalises a raw id taken from a request path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionIdError::Empty`] if nothing remains after trimming.
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionIdError::Empty);
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
