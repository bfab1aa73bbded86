//! tether-broker library crate.
//!
//! A rendezvous broker that pairs two inbound WebSocket connections, a
//! **master** and a **slave**, that share a session id, then relays every
//! frame between them verbatim.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! master (client)          slave (job agent)
//!        ╲                      ╱
//!         ▼                    ▼
//! [tether-broker]
//!   ├── domain/             BrokerConfig, directory backend selection
//!   ├── application/
//!   │     ├── session/      per-session state machine + frame relay
//!   │     ├── control/      registry; claim before insert, remove before release
//!   │     ├── attach/       attach preconditions and ordering
//!   │     ├── link/         transport-agnostic connection channels
//!   │     └── directory/    SessionDirectory port
//!   └── infrastructure/
//!         ├── http_server/  axum routes + serve loop
//!         ├── ws_link/      WebSocket ⇄ link adapter
//!         └── directory/    memory and SQLite SessionDirectory backends
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `tether-core`, and reaches
//!   sockets and stores only through `link` and `directory`.
//! - `infrastructure` depends on all other layers plus `axum` and `rusqlite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: session lifecycle and the ports it depends on.
pub mod application;

/// Infrastructure layer: HTTP/WebSocket serving and directory backends.
pub mod infrastructure;
