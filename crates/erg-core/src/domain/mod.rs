//! Domain entities for Ergometer.Live.
//!
//! Pure types and rules with no I/O: nothing in this module talks to a
//! monitor, a socket, or a clock other than through plain values passed in.

/// Workout state enumeration and the active/idle classification.
pub mod state;

/// Workout parameters as sent by subscribers, and their validation into a
/// device-ready [`workout::WorkoutPlan`].
pub mod workout;

/// Raw snapshots from the driver and the wire-ready statistics record.
pub mod telemetry;

/// Cached information about the connected monitor.
pub mod info;
