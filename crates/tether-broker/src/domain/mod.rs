//! Domain layer for tether-broker.
//!
//! Pure types with no I/O: the broker's runtime configuration.  Session,
//! frame and directory-record types shared with other components live in
//! `tether-core`.

pub mod config;

pub use config::{BrokerConfig, ConfigError, DirectoryBackend};
