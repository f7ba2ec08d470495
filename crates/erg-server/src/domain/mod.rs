//! Domain layer for erg-server.
//!
//! Plain types with no I/O: runtime configuration and the typed vocabulary
//! spoken between the router and the device manager.  Nothing here spawns a
//! task, opens a socket, or touches the monitor.

pub mod config;
pub mod control;

pub use config::{ConnectionConfig, FileConfig, PollIntervals, ServerConfig};
pub use control::{ControlError, ControlRequest, ControlResponse};
