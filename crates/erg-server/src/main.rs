//! Ergometer.Live server — entry point.
//!
//! Streams live telemetry from a rowing performance monitor to WebSocket
//! subscribers and accepts workout commands from any of them.
//!
//! # Usage
//!
//! ```text
//! erg-server [OPTIONS]
//!
//! Options:
//!   --bind            <IP>    Listener address           [default: 0.0.0.0]
//!   --port            <PORT>  Listener port              [default: 8080]
//!   --read-timeout    <SECS>  Subscriber read timeout    [default: 60]
//!   --write-timeout   <SECS>  Subscriber write timeout   [default: 10]
//!   --control-timeout <SECS>  Device command timeout     [default: 10]
//!   --simulate                Serve a simulated monitor
//!   --config          <PATH>  TOML configuration file
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Flag                |
//! |-----------------------|---------------------|
//! | `ERG_BIND`            | `--bind`            |
//! | `ERG_PORT`            | `--port`            |
//! | `ERG_READ_TIMEOUT`    | `--read-timeout`    |
//! | `ERG_WRITE_TIMEOUT`   | `--write-timeout`   |
//! | `ERG_CONTROL_TIMEOUT` | `--control-timeout` |
//! | `ERG_SIMULATE`        | `--simulate`        |
//! | `ERG_CONFIG`          | `--config`          |
//!
//! Precedence: flag, then environment variable, then configuration file,
//! then the built-in default.  `RUST_LOG` controls log verbosity.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use erg_server::domain::config::{
    DEFAULT_CONTROL_TIMEOUT, DEFAULT_PORT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
use erg_server::domain::{ConnectionConfig, FileConfig, PollIntervals, ServerConfig};
use erg_server::infrastructure::device::{NoDevices, SimulatedDiscovery};
use erg_server::infrastructure::Service;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Ergometer.Live telemetry server.
#[derive(Debug, Parser)]
#[command(
    name = "erg-server",
    about = "Live telemetry broadcast and command server for a rowing performance monitor",
    version
)]
struct Cli {
    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "ERG_BIND")]
    bind: Option<IpAddr>,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "ERG_PORT")]
    port: Option<u16>,

    /// Seconds of silence tolerated from a subscriber before it is
    /// disconnected.  Pings are sent at nine tenths of this interval.
    #[arg(long, env = "ERG_READ_TIMEOUT", value_name = "SECS")]
    read_timeout: Option<u64>,

    /// Seconds allowed for a single write to a subscriber.
    #[arg(long, env = "ERG_WRITE_TIMEOUT", value_name = "SECS")]
    write_timeout: Option<u64>,

    /// Seconds allowed for one device command round trip.
    #[arg(long, env = "ERG_CONTROL_TIMEOUT", value_name = "SECS")]
    control_timeout: Option<u64>,

    /// Serve a simulated monitor instead of real hardware.
    #[arg(long, env = "ERG_SIMULATE")]
    simulate: bool,

    /// Path to a TOML configuration file.
    #[arg(long, env = "ERG_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Merges flags, the configuration file and the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout resolves to zero.
    fn into_server_config(self, file: FileConfig) -> anyhow::Result<ServerConfig> {
        let defaults = ServerConfig::default();

        let bind = self.bind.or(file.bind).unwrap_or(defaults.bind_addr.ip());
        let port = self.port.or(file.port).unwrap_or(DEFAULT_PORT);

        let read_timeout = seconds(
            "read timeout",
            self.read_timeout.or(file.read_timeout_secs),
            DEFAULT_READ_TIMEOUT,
        )?;
        let write_timeout = seconds(
            "write timeout",
            self.write_timeout.or(file.write_timeout_secs),
            DEFAULT_WRITE_TIMEOUT,
        )?;
        let control_timeout = seconds(
            "control timeout",
            self.control_timeout.or(file.control_timeout_secs),
            DEFAULT_CONTROL_TIMEOUT,
        )?;

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(bind, port),
            connection: ConnectionConfig::new(read_timeout, write_timeout),
            control_timeout,
            poll: PollIntervals::default(),
            simulate: self.simulate || file.simulate.unwrap_or(false),
        })
    }
}

fn seconds(name: &str, value: Option<u64>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Some(0) => bail!("{name} must be at least one second"),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

fn load_config_file(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    FileConfig::from_toml_str(&text)
        .with_context(|| format!("invalid config file {}", path.display()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => FileConfig::default(),
    };
    let config = cli.into_server_config(file)?;

    info!("Ergometer.Live server starting on {}", config.bind_addr);

    let service = if config.simulate {
        info!("using simulated performance monitor");
        Service::start(config, &SimulatedDiscovery).await?
    } else {
        warn!("no hardware driver is linked into this build; run with --simulate for a simulated monitor");
        Service::start(config, &NoDevices).await?
    };

    info!("listening on ws://{}", service.local_addr());
    if !service.device_connected().await {
        warn!("no performance monitor connected; commands will be rejected until restart");
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
    }

    service.shutdown().await;
    info!("Ergometer.Live server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
