//! Records stored in the distributed session directory.
//!
//! A directory entry proves that one broker instance owns a session id.  The
//! stored value is informational (who owns it, for diagnostics); ownership is
//! carried by the key's existence and by the [`ClaimToken`] handed back when
//! the entry was created.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one broker instance, written into every entry it claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerIdentity {
    /// Host name of the broker machine.
    pub host: String,
    /// Address the broker is reachable on.
    pub ip: IpAddr,
    /// Port the broker listens on.
    pub port: u16,
}

/// The value stored under a session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub session_id: String,
    #[serde(flatten)]
    pub broker: BrokerIdentity,
}

/// Opaque version token (an entity tag) returned by a successful claim.
///
/// A release must present the token of the claim it is undoing; a stale
/// token cannot delete somebody else's newer entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(String);

impl ClaimToken {
    /// Mints a fresh, random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a token read back from a store.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
