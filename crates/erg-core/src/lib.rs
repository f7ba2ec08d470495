//! # erg-core
//!
//! Shared library for Ergometer.Live containing the workout domain types, the
//! boundary to the rowing-monitor driver, and the JSON envelopes exchanged with
//! subscribers.
//!
//! This crate has zero dependencies on sockets, async runtimes, or hardware
//! transports.  Everything here can be unit-tested without a monitor attached.
//!
//! # Architecture overview
//!
//! Ergometer.Live streams live telemetry from one rowing-machine performance
//! monitor to any number of WebSocket subscribers, and lets any subscriber
//! start or stop a workout on that monitor.
//!
//! - **`domain`** – Workout states and their active/idle classification,
//!   workout parameters and their validation, telemetry records and the cached
//!   device information.
//!
//! - **`device`** – The [`ErgDevice`] trait: the capability set the server
//!   consumes from a monitor driver.  The driver itself (USB transport, CSAFE
//!   command encoding) lives outside this repository.
//!
//! - **`protocol`** – The JSON envelopes: what a subscriber sends, what the
//!   server replies, and the timestamped event envelope used for broadcasts.

pub mod device;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `erg_core::WorkoutState` instead of `erg_core::domain::state::WorkoutState`.
pub use device::{DeviceDiscovery, DeviceError, DeviceVersion, ErgDevice};
pub use domain::info::DeviceInfo;
pub use domain::state::{is_workout_active, WorkoutState};
pub use domain::telemetry::{WorkoutSnapshot, WorkoutStats};
pub use domain::workout::{WorkoutError, WorkoutKind, WorkoutParams, WorkoutPlan};
pub use protocol::codec::{decode_inbound, encode_event, encode_reply, ProtocolError};
pub use protocol::messages::{ControlKind, EventKind, InboundMessage, Reply};
