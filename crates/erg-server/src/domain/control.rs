//! Requests the router sends to the device manager, and what comes back.

use erg_core::{ControlKind, DeviceError, DeviceInfo, WorkoutError, WorkoutParams};
use serde_json::{Map, Value};
use thiserror::Error;

/// A command for the monitor, serialized through the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    StartWorkout(WorkoutParams),
    StopWorkout,
    GetStatus,
}

impl ControlRequest {
    /// Builds a request from the `type` and `data` of an inbound message.
    ///
    /// Only `start_workout` reads `data`; the other kinds ignore it.
    ///
    /// # Errors
    ///
    /// - [`ControlError::UnknownRequest`] for an unrecognized kind.
    /// - [`ControlError::Validation`] when the `start_workout` data has no
    ///   usable `workout_type`.
    pub fn from_kind(kind: &str, data: &Map<String, Value>) -> Result<Self, ControlError> {
        let kind = kind
            .parse::<ControlKind>()
            .map_err(|_| ControlError::UnknownRequest(kind.to_string()))?;
        match kind {
            ControlKind::StartWorkout => Ok(Self::StartWorkout(WorkoutParams::from_data(data)?)),
            ControlKind::StopWorkout => Ok(Self::StopWorkout),
            ControlKind::GetStatus => Ok(Self::GetStatus),
        }
    }
}

/// Result of a successful [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// The command was carried out.
    Done,
    Status(DeviceInfo),
}

/// Why a control request did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0}")]
    Validation(#[from] WorkoutError),

    #[error("{0}")]
    Device(#[from] DeviceError),

    #[error("device not connected")]
    NotConnected,

    #[error("unknown request type: {0}")]
    UnknownRequest(String),

    /// The exchange with the control loop exceeded its deadline.
    #[error("timeout waiting for device manager")]
    Timeout,

    /// The control loop has shut down.
    #[error("device manager is not running")]
    Stopped,
}

impl ControlError {
    /// True when the request never reached the device: the control loop
    /// was unreachable or did not answer in time.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Timeout | Self::Stopped)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
