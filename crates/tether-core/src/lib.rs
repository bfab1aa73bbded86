//! # tether-core
//!
//! Shared library for the tether rendezvous broker containing the control
//! message codec and the session domain types.
//!
//! This crate has zero dependencies on sockets, async runtimes, or storage.
//!
//! # Architecture overview (for beginners)
//!
//! Tether pairs two WebSocket connections that both dial *in* to the broker:
//! a **master** (an interactive client) and a **slave** (an agent running in a
//! remote job).  Once both sides are attached, every frame one side sends is
//! relayed verbatim to the other.
//!
//! This crate (`tether-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – The two kinds of frame that travel over a connection
//!   ([`Frame`]) and the broker-originated control notifications
//!   ([`ControlMessage`]) that share the text channel with application data.
//!
//! - **`domain`** – Session identity ([`SessionId`]), the session state machine
//!   states ([`SessionState`]), diagnostics snapshots, and the records written
//!   into the distributed session directory.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::SessionId` instead of `tether_core::domain::session_id::SessionId`.
pub use domain::directory::{BrokerIdentity, ClaimToken, DirectoryEntry};
pub use domain::session_id::{SessionId, SessionIdError};
pub use domain::state::{SessionState, SessionSummary, StatusSummary};
pub use protocol::codec::{decode_control, encode_control, is_control_frame, ControlCodecError};
pub use protocol::messages::{ControlMessage, Frame, CONTROL_PREFIX};
