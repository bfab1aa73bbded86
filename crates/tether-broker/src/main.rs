//! Tether broker entry point.
//!
//! Pairs inbound master and slave WebSocket connections by session id and
//! relays frames between them.  Several instances may run behind a load
//! balancer as long as they share one Session Directory.
//!
//! # Usage
//!
//! ```text
//! tether-broker [OPTIONS]
//!
//! Options:
//!   --config <FILE>           TOML config file
//!   --bind <ADDR>             HTTP/WebSocket listen address [default: 0.0.0.0:8381]
//!   --advertise-host <HOST>   host name written into directory entries
//!   --advertise-ip <IP>       address written into directory entries
//!   --directory <BACKEND>     memory | sqlite [default: memory]
//!   --sqlite-path <FILE>      database file for the sqlite backend
//!   --wait-pulse-ms <MS>      wait notification interval [default: 2000]
//!   --init-retry-ms <MS>      directory provisioning retry delay [default: 5000]
//!   --close-timeout-ms <MS>   close handshake limit per connection [default: 5000]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Flag               |
//! |--------------------------|--------------------|
//! | `TETHER_CONFIG`          | `--config`         |
//! | `TETHER_BIND`            | `--bind`           |
//! | `TETHER_ADVERTISE_HOST`  | `--advertise-host` |
//! | `TETHER_ADVERTISE_IP`    | `--advertise-ip`   |
//! | `TETHER_DIRECTORY`       | `--directory`      |
//! | `TETHER_SQLITE_PATH`     | `--sqlite-path`    |
//! | `TETHER_WAIT_PULSE_MS`   | `--wait-pulse-ms`  |
//! | `TETHER_INIT_RETRY_MS`   | `--init-retry-ms`  |
//! | `TETHER_CLOSE_TIMEOUT_MS`| `--close-timeout-ms` |
//!
//! Flags and variables override the config file, which overrides the built-in
//! defaults.  Log verbosity follows `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_broker::application::Control;
use tether_broker::domain::{BrokerConfig, DirectoryBackend};
use tether_broker::infrastructure::{directory, run_server, ServerState};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Session Directory backend names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Memory,
    Sqlite,
}

/// Tether rendezvous broker.
///
/// Every option is optional so that an unset flag falls through to the
/// config file and then to the defaults.
#[derive(Debug, Parser)]
#[command(
    name = "tether-broker",
    about = "Rendezvous broker pairing master and slave WebSocket connections",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Address the HTTP/WebSocket server listens on.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<SocketAddr>,

    /// Host name recorded in Session Directory entries.
    #[arg(long, env = "TETHER_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// IP address recorded in Session Directory entries.
    #[arg(long, env = "TETHER_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,

    /// Session Directory backend.
    ///
    /// `memory` is only safe with a single broker instance.
    #[arg(long, value_enum, env = "TETHER_DIRECTORY")]
    directory: Option<BackendKind>,

    /// SQLite database file shared by every broker instance.
    #[arg(long, env = "TETHER_SQLITE_PATH")]
    sqlite_path: Option<PathBuf>,

    /// Interval between `wait` notifications to an unpaired master, in ms.
    #[arg(long, env = "TETHER_WAIT_PULSE_MS")]
    wait_pulse_ms: Option<u64>,

    /// Delay between Session Directory provisioning attempts, in ms.
    #[arg(long, env = "TETHER_INIT_RETRY_MS")]
    init_retry_ms: Option<u64>,

    /// How long a closing connection may take to answer, in ms.
    #[arg(long, env = "TETHER_CLOSE_TIMEOUT_MS")]
    close_timeout_ms: Option<u64>,
}

impl Cli {
    /// Merges the CLI over the config file (if any) over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded, or if the sqlite
    /// backend is selected without a database path anywhere.
    fn into_broker_config(self) -> anyhow::Result<BrokerConfig> {
        let base = match &self.config {
            Some(path) => BrokerConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => BrokerConfig::default(),
        };

        let directory = match (self.directory, self.sqlite_path) {
            (Some(BackendKind::Memory), _) => DirectoryBackend::Memory,
            (Some(BackendKind::Sqlite) | None, Some(path)) => DirectoryBackend::Sqlite { path },
            (Some(BackendKind::Sqlite), None) => match base.directory {
                sqlite @ DirectoryBackend::Sqlite { .. } => sqlite,
                DirectoryBackend::Memory => {
                    bail!("the sqlite directory backend requires --sqlite-path")
                }
            },
            (None, None) => base.directory,
        };

        Ok(BrokerConfig {
            bind_addr: self.bind.unwrap_or(base.bind_addr),
            advertise_host: self.advertise_host.or(base.advertise_host),
            advertise_ip: self.advertise_ip.or(base.advertise_ip),
            directory,
            wait_pulse_interval: self
                .wait_pulse_ms
                .map(Duration::from_millis)
                .unwrap_or(base.wait_pulse_interval),
            init_retry_delay: self
                .init_retry_ms
                .map(Duration::from_millis)
                .unwrap_or(base.init_retry_delay),
            close_timeout: self
                .close_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.close_timeout),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised from `RUST_LOG` (default `info`).
/// 2. CLI arguments, the optional config file and the defaults are merged
///    into a [`BrokerConfig`].
/// 3. The Session Directory backend is built and provisioned.  Provisioning
///    is retried forever with a fixed delay, so the broker comes up as soon as
///    its store does.
/// 4. The HTTP server runs until Ctrl+C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_broker_config()?;
    let identity = config.identity(std::env::var("HOSTNAME").ok());

    // ── Session Directory ─────────────────────────────────────────────────────
    let store = directory::build(&config.directory);
    let control = Control::new(store, identity, config.wait_pulse_interval);

    let identity = control.identity();
    info!(
        bind = %config.bind_addr,
        host = %identity.host,
        ip = %identity.ip,
        directory = ?config.directory,
        "tether broker starting"
    );
    control.init_with_retry(config.init_retry_delay).await;

    // ── Serve ─────────────────────────────────────────────────────────────────
    run_server(
        config.bind_addr,
        ServerState::new(control, config.close_timeout),
    )
    .await?;

    info!("tether broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
