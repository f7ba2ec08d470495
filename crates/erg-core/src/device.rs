//! Boundary to the performance-monitor driver.
//!
//! The server never speaks to hardware directly.  It consumes the capability
//! set below, which a driver crate implements on top of its own transport
//! (USB HID and CSAFE framing for a real monitor, an in-memory model for the
//! simulator, a scripted recorder for tests).
//!
//! # Contract
//!
//! - Every call may fail independently and carries no latency guarantee.
//! - Implementations do not need to be safe for concurrent use: the server
//!   guarantees that at most one call is in flight per device at any time.
//!   `&mut self` receivers make that guarantee visible in the types.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::state::WorkoutState;
use crate::domain::telemetry::WorkoutSnapshot;

/// Errors reported by a monitor driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// Enumeration found no monitor.
    #[error("no performance monitor found")]
    NotFound,

    /// Enumeration itself failed (permissions, bus error).
    #[error("failed to enumerate devices: {0}")]
    Enumeration(String),

    /// The transport failed while talking to the monitor.
    #[error("device I/O error: {0}")]
    Io(String),

    /// The monitor answered, but rejected the command.
    #[error("device rejected command: {0}")]
    Rejected(String),

    /// The monitor did not answer in time.
    #[error("device did not respond")]
    Timeout,
}

/// Version block reported by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceVersion {
    pub model: u16,
    pub hardware_version: u16,
    pub firmware_version: u16,
}

/// The capability set the server needs from one monitor.
#[async_trait]
pub trait ErgDevice: Send {
    /// Opens the transport and performs the monitor handshake.
    async fn connect(&mut self) -> Result<(), DeviceError>;
    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    async fn version(&mut self) -> Result<DeviceVersion, DeviceError>;
    async fn serial(&mut self) -> Result<String, DeviceError>;
    /// Battery level in percent.
    async fn battery_level(&mut self) -> Result<u8, DeviceError>;
    async fn erg_type(&mut self) -> Result<String, DeviceError>;
    async fn operational_state(&mut self) -> Result<String, DeviceError>;

    async fn workout_state(&mut self) -> Result<WorkoutState, DeviceError>;
    async fn workout_snapshot(&mut self) -> Result<WorkoutSnapshot, DeviceError>;

    async fn start_just_row(&mut self, with_splits: bool) -> Result<(), DeviceError>;
    async fn start_fixed_distance(&mut self, meters: u32, split_meters: u32)
        -> Result<(), DeviceError>;
    /// Durations are in hundredths of a second.
    async fn start_fixed_time(&mut self, duration_cs: u32, split_cs: u32)
        -> Result<(), DeviceError>;
    async fn terminate_workout(&mut self) -> Result<(), DeviceError>;
}

/// Finds monitors attached to this machine.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Returns every monitor found, in bus order.  An empty list is not an
    /// error.
    async fn enumerate(&self) -> Result<Vec<Box<dyn ErgDevice>>, DeviceError>;
}
