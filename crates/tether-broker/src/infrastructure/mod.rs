//! Infrastructure layer for tether-broker.
//!
//! The infrastructure layer handles all I/O: serving HTTP, adapting upgraded
//! WebSockets to session links, and talking to the Session Directory store.
//!
//! # Responsibilities
//!
//! - Routing attach and status requests and performing the WebSocket upgrade
//! - Reading and writing WebSocket frames for each attached connection
//! - Implementing the `SessionDirectory` port (in-memory and SQLite)
//! - The graceful-shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Session state transitions or relay decisions (application layer)
//! - Configuration parsing (domain layer and `main.rs`)

pub mod directory;
pub mod http_server;
pub mod ws_link;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use http_server::{router, run_server, serve, ServerState};
