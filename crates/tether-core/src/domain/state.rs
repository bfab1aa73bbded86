//! Session states and diagnostics snapshots.
//!
//! ```text
//!   WaitingForMaster ──attach master──▶ WaitingForSlave ──attach slave──▶ Forwarding
//!          │                                  │                              │
//!          │                             master ends                   either side ends
//!          │                                  ▼                              ▼
//!          └──────────── abandon ───────▶ Destroyed ◀──── other side ends ── Closing
//! ```
//!
//! `Destroyed` is terminal.  Abandonment is legal from every state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle stage of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Claimed in the directory, master connection not yet attached.
    WaitingForMaster,
    /// Master attached; wait pulses flow until a slave arrives.
    WaitingForSlave,
    /// Both sides attached; frames are relayed in both directions.
    Forwarding,
    /// One side has ended; waiting for the other side to finish.
    Closing,
    /// Torn down and released.  Terminal.
    Destroyed,
}

impl SessionState {
    /// Stable lower-case name, as used in logs and the status endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::WaitingForMaster => "waiting_for_master",
            SessionState::WaitingForSlave => "waiting_for_slave",
            SessionState::Forwarding => "forwarding",
            SessionState::Closing => "closing",
            SessionState::Destroyed => "destroyed",
        }
    }

    /// Returns `true` once the session has been torn down.
    pub fn is_terminal(self) -> bool {
        self == SessionState::Destroyed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: SessionState,
    pub has_master: bool,
    pub has_slave: bool,
    /// Creation time in milliseconds since the Unix epoch.
    pub create_time: u64,
}

/// Snapshot of every live session on this broker instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub sessions: Vec<SessionSummary>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_destroyed_is_terminal() {
        assert!(SessionState::Destroyed.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
        assert!(!SessionState::Forwarding.is_terminal());
    }

    #[test]
    fn test_state_serializes_as_snake_case() {
        let json = serde_json::to_string(&SessionState::WaitingForSlave).unwrap();
        assert_eq!(json, "\"waiting_for_slave\"");
    }

    #[test]
    fn test_display_matches_serde_name() {
        for state in [
            SessionState::WaitingForMaster,
            SessionState::WaitingForSlave,
            SessionState::Forwarding,
            SessionState::Closing,
            SessionState::Destroyed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn test_summary_json_field_names() {
        // Arrange
        let summary = StatusSummary {
            sessions: vec![SessionSummary {
                id: "abc123".to_string(),
                state: SessionState::Forwarding,
                has_master: true,
                has_slave: true,
                create_time: 1_700_000_000_000,
            }],
        };

        // Act
        let value = serde_json::to_value(&summary).unwrap();

        // Assert: the diagnostics consumer reads these exact keys
        let s = &value["sessions"][0];
        assert_eq!(s["id"], "abc123");
        assert_eq!(s["state"], "forwarding");
        assert_eq!(s["has_master"], true);
        assert_eq!(s["has_slave"], true);
        assert_eq!(s["create_time"], 1_700_000_000_000u64);
    }
}
