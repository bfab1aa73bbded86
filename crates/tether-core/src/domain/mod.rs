//! Domain entities for the tether broker.
//!
//! This module contains pure business types with no infrastructure
//! dependencies: no sockets, no timers, no storage drivers.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of a clean-architecture program holds the concepts that
//! make the system what it is.  Here those are the session identifier, the
//! states a session moves through, and the record that proves a broker owns a
//! session id.  Outer layers (the broker's application and infrastructure
//! code) depend on these types; these types never depend on them.

/// Records stored in the distributed session directory.
pub mod directory;

/// Case-normalised session identifiers.
pub mod session_id;

/// Session states and diagnostics snapshots.
pub mod state;
