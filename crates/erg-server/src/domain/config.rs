//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from, in order of precedence, command-line flags,
//! environment variables, an optional TOML file, and the defaults below.
//!
//! Keeping configuration as plain structs (no global state, no environment
//! reads inside the domain) lets tests build a server with millisecond
//! timeouts without touching the process environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

/// Largest inbound WebSocket message accepted from a subscriber, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Capacity of each connection's outbound queue.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Capacity of the hub's broadcast and inbound queues.
pub const HUB_QUEUE_SIZE: usize = 256;

/// Capacity of the device manager's request queue.
pub const CONTROL_QUEUE_SIZE: usize = 32;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

// ── Connection ────────────────────────────────────────────────────────────────

/// Per-connection timing and sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Longest silence tolerated from a subscriber.  Any inbound frame,
    /// including a pong, restarts the clock.
    pub read_timeout: Duration,

    /// Deadline for a single outbound write.
    pub write_timeout: Duration,

    /// How often a liveness ping is sent.  Always shorter than
    /// `read_timeout` so a healthy peer's pong arrives before the deadline.
    pub ping_interval: Duration,

    pub max_message_size: usize,
    pub send_buffer: usize,
}

impl ConnectionConfig {
    /// Builds a config whose ping interval is nine tenths of `read_timeout`.
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
            ping_interval: read_timeout * 9 / 10,
            max_message_size: MAX_MESSAGE_SIZE,
            send_buffer: SEND_BUFFER_SIZE,
        }
    }
}

impl Default for ConnectionConfig {
    /// | Field            | Default   |
    /// |------------------|-----------|
    /// | read_timeout     | 60 s      |
    /// | write_timeout    | 10 s      |
    /// | ping_interval    | 54 s      |
    /// | max_message_size | 8192 B    |
    /// | send_buffer      | 256       |
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT)
    }
}

// ── Monitor cadence ───────────────────────────────────────────────────────────

/// Polling periods of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// While a workout is in progress.
    pub active: Duration,
    /// While the monitor is idle.
    pub idle: Duration,
    /// Before the first successful state query.
    pub check: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            active: Duration::from_millis(100),
            idle: Duration::from_secs(1),
            check: Duration::from_millis(500),
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// All runtime configuration for the server.
///
/// # Example
///
/// ```rust
/// use erg_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(!cfg.simulate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.  `0.0.0.0` accepts
    /// subscribers from any interface.
    pub bind_addr: SocketAddr,

    pub connection: ConnectionConfig,

    /// Upper bound on one request/response exchange with the device manager.
    pub control_timeout: Duration,

    pub poll: PollIntervals,

    /// Serve a simulated monitor instead of searching for hardware.
    pub simulate: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            connection: ConnectionConfig::default(),
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            poll: PollIntervals::default(),
            simulate: false,
        }
    }
}

// ── Configuration file ────────────────────────────────────────────────────────

/// Settings read from the optional TOML configuration file.
///
/// Every key is optional; a missing key falls through to the built-in
/// default.  Flags and environment variables take precedence over the file.
///
/// ```toml
/// bind = "127.0.0.1"
/// port = 9000
/// read_timeout_secs = 30
/// simulate = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub read_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub control_timeout_secs: Option<u64>,
    pub simulate: Option<bool>,
}

impl FileConfig {
    /// Parses the contents of a configuration file.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or an unknown key.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_8080() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.bind_addr.ip().is_unspecified());
    }

    #[test]
    fn test_default_ping_interval_is_54s() {
        // Arrange / Act
        let cfg = ConnectionConfig::default();

        // Assert: nine tenths of the 60 s read timeout
        assert_eq!(cfg.read_timeout, Duration::from_secs(60));
        assert_eq!(cfg.ping_interval, Duration::from_secs(54));
        assert_eq!(cfg.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_ping_interval_tracks_read_timeout() {
        let cfg = ConnectionConfig::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(cfg.ping_interval, Duration::from_secs(9));
        assert!(cfg.ping_interval < cfg.read_timeout);
    }

    #[test]
    fn test_default_limits() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.max_message_size, 8192);
        assert_eq!(cfg.send_buffer, 256);
    }

    #[test]
    fn test_default_poll_intervals() {
        let poll = PollIntervals::default();
        assert_eq!(poll.active, Duration::from_millis(100));
        assert_eq!(poll.idle, Duration::from_secs(1));
        assert_eq!(poll.check, Duration::from_millis(500));
    }

    #[test]
    fn test_file_config_partial() {
        let file = FileConfig::from_toml_str("port = 9000\nsimulate = true\n").unwrap();
        assert_eq!(file.port, Some(9000));
        assert_eq!(file.simulate, Some(true));
        assert_eq!(file.bind, None);
        assert_eq!(file.read_timeout_secs, None);
    }

    #[test]
    fn test_file_config_empty_is_default() {
        assert_eq!(FileConfig::from_toml_str("").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_file_config_rejects_unknown_key() {
        assert!(FileConfig::from_toml_str("prot = 9000").is_err());
    }

    #[test]
    fn test_file_config_rejects_bad_address() {
        assert!(FileConfig::from_toml_str(r#"bind = "not.an.ip""#).is_err());
    }
}
