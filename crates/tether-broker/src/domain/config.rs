//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for all runtime settings.
//! It is assembled at startup from three layers, highest priority first:
//!
//! 1. command-line arguments / `TETHER_*` environment variables (see `main.rs`)
//! 2. an optional TOML file (`--config`)
//! 3. the built-in defaults below
//!
//! # Example file
//!
//! ```toml
//! bind_addr = "0.0.0.0:8381"
//! advertise_host = "broker-0"
//! wait_pulse_interval_ms = 2000
//! init_retry_delay_ms = 5000
//! close_timeout_ms = 5000
//!
//! [directory]
//! backend = "sqlite"
//! path = "/var/db/tether/sessions.db"
//! ```
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads in this module) makes the broker easy to embed in tests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use tether_core::BrokerIdentity;

/// Host name written into directory entries when nothing better is known.
pub const DEFAULT_HOST_NAME: &str = "tether-broker";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which Session Directory implementation backs this broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DirectoryBackend {
    /// Process-local map.  Only safe with a single broker instance.
    #[default]
    Memory,
    /// SQLite database file shared by every broker instance.
    Sqlite { path: PathBuf },
}

/// All runtime configuration for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// Host name advertised in directory entries.  Falls back to `$HOSTNAME`.
    pub advertise_host: Option<String>,

    /// IP advertised in directory entries.  Falls back to the bind IP.
    pub advertise_ip: Option<IpAddr>,

    /// Session Directory backend.
    pub directory: DirectoryBackend,

    /// How often a waiting master is sent a `wait` notification.
    pub wait_pulse_interval: Duration,

    /// Delay between attempts to provision the Session Directory at startup.
    pub init_retry_delay: Duration,

    /// How long a connection asked to close may take to send its own close
    /// frame before it is dropped.
    pub close_timeout: Duration,
}

impl Default for BrokerConfig {
    /// | Field               | Default           |
    /// |---------------------|-------------------|
    /// | bind_addr           | `0.0.0.0:8381`    |
    /// | directory           | memory            |
    /// | wait_pulse_interval | 2 seconds         |
    /// | init_retry_delay    | 5 seconds         |
    /// | close_timeout       | 5 seconds         |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8381),
            advertise_host: None,
            advertise_ip: None,
            directory: DirectoryBackend::Memory,
            wait_pulse_interval: Duration::from_secs(2),
            init_retry_delay: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// On-disk shape of the TOML file.  Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<SocketAddr>,
    advertise_host: Option<String>,
    advertise_ip: Option<IpAddr>,
    directory: Option<DirectoryBackend>,
    wait_pulse_interval_ms: Option<u64>,
    init_retry_delay_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
}

impl BrokerConfig {
    /// Parses a TOML document, filling anything it omits from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML, unknown keys, or a
    /// `sqlite` directory without a `path`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = Self::default();
        Ok(Self {
            bind_addr: file.bind_addr.unwrap_or(defaults.bind_addr),
            advertise_host: file.advertise_host,
            advertise_ip: file.advertise_ip,
            directory: file.directory.unwrap_or(defaults.directory),
            wait_pulse_interval: file
                .wait_pulse_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_pulse_interval),
            init_retry_delay: file
                .init_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.init_retry_delay),
            close_timeout: file
                .close_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_timeout),
        })
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolves the identity this broker writes into directory entries.
    ///
    /// `env_host` is the value of the host-name environment variable, passed
    /// in by the caller so this stays free of environment reads.
    pub fn identity(&self, env_host: Option<String>) -> BrokerIdentity {
        let host = self
            .advertise_host
            .clone()
            .or(env_host)
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string());

        let ip = match self.advertise_ip {
            Some(ip) => ip,
            None if !self.bind_addr.ip().is_unspecified() => self.bind_addr.ip(),
            None => {
                warn!(
                    bind = %self.bind_addr,
                    "bound to a wildcard address and no advertise IP set; advertising loopback"
                );
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        };

        BrokerIdentity {
            host,
            ip,
            port: self.bind_addr.port(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
