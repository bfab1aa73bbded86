//! Application layer for tether-broker.
//!
//! The application layer owns the session lifecycle: it knows *what* happens
//! when a master or slave attaches, sends a frame, or goes away, but delegates
//! *how* bytes move and where claims are stored to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - The per-session state machine and frame relay (`session`)
//! - The in-process session registry and claim/release protocol (`control`)
//! - Attach preconditions and ordering (`attach`)
//! - The ports infrastructure plugs into: connection links (`link`) and the
//!   Session Directory (`directory`)
//!
//! # What does NOT belong here?
//!
//! - Sockets, HTTP routes, or WebSocket framing (infrastructure)
//! - SQL or any other store wire format (infrastructure)

pub mod attach;
pub mod control;
pub mod directory;
pub mod link;
pub mod session;

pub use attach::AttachError;
pub use control::{Control, ControlError};
pub use directory::{ClaimOutcome, DirectoryError, SessionDirectory};
pub use link::{link, Link, LinkEvent, LinkRemote, Outbound, PeerHandle, QueueFull, OUTBOUND_CAPACITY};
pub use session::{Role, Session, SessionError};
