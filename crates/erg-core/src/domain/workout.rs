//! Workout parameters and their validation.
//!
//! Subscribers describe the workout they want in loosely typed JSON
//! (`{"workout_type":"fixed_time","time":60}`).  This module turns that into
//! a [`WorkoutParams`] value and then, through [`WorkoutParams::validate`],
//! into a [`WorkoutPlan`] that carries exactly the values the monitor needs,
//! already in device units.
//!
//! Validation happens before any device call is made.  A plan that reaches
//! the device has a non-zero target and a duration that fits the device's
//! hundredths-of-a-second counter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Hundredths of a second per second; the monitor's native time unit.
pub const CENTISECONDS_PER_SECOND: u32 = 100;

/// Errors produced while reading or validating workout parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkoutError {
    /// `workout_type` was absent or not a string.
    #[error("workout_type is required")]
    MissingWorkoutType,

    /// `workout_type` named a kind the monitor does not support.
    #[error("unknown workout type: {0}")]
    UnknownWorkoutType(String),

    /// A numeric field was not a non-negative number that fits in 32 bits.
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A fixed-distance workout was requested without a positive distance.
    #[error("distance is required for fixed_distance workout")]
    MissingDistance,

    /// A fixed-time workout was requested without a positive duration.
    #[error("time is required for fixed_time workout")]
    MissingTime,

    /// The duration overflows the device's hundredths-of-a-second counter.
    #[error("{field} of {seconds}s is too long for the monitor")]
    DurationOutOfRange { field: &'static str, seconds: u32 },
}

// ── Workout kind ──────────────────────────────────────────────────────────────

/// The three workout programs a subscriber can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutKind {
    /// Open-ended rowing with no target.
    JustRow,
    /// Row until a target distance in meters is reached.
    FixedDistance,
    /// Row until a target duration in seconds elapses.
    FixedTime,
}

impl WorkoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkoutKind::JustRow => "just_row",
            WorkoutKind::FixedDistance => "fixed_distance",
            WorkoutKind::FixedTime => "fixed_time",
        }
    }
}

impl FromStr for WorkoutKind {
    type Err = WorkoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "just_row" => Ok(WorkoutKind::JustRow),
            "fixed_distance" => Ok(WorkoutKind::FixedDistance),
            "fixed_time" => Ok(WorkoutKind::FixedTime),
            other => Err(WorkoutError::UnknownWorkoutType(other.to_string())),
        }
    }
}

impl fmt::Display for WorkoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Parameters ────────────────────────────────────────────────────────────────

/// Workout parameters as supplied by a subscriber.
///
/// Distances are in meters and durations in whole seconds.  Every numeric
/// field is optional at this stage; [`validate`](Self::validate) decides
/// which ones the chosen kind requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutParams {
    pub workout_type: WorkoutKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_time: Option<u32>,
}

impl WorkoutParams {
    /// Creates parameters of the given kind with no targets or splits.
    pub fn new(workout_type: WorkoutKind) -> Self {
        Self {
            workout_type,
            distance: None,
            time: None,
            split_distance: None,
            split_time: None,
        }
    }

    /// Reads parameters from the `data` object of a `start_workout` message.
    ///
    /// JSON numbers are accepted in any representation (`60`, `60.0`);
    /// fractional parts are truncated.  Negative numbers, non-numbers and
    /// values above `u32::MAX` are rejected.
    ///
    /// # Errors
    ///
    /// - [`WorkoutError::MissingWorkoutType`] when `workout_type` is absent or
    ///   not a string.
    /// - [`WorkoutError::UnknownWorkoutType`] for an unsupported kind.
    /// - [`WorkoutError::InvalidField`] for a malformed numeric field.
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, WorkoutError> {
        let workout_type = data
            .get("workout_type")
            .and_then(Value::as_str)
            .ok_or(WorkoutError::MissingWorkoutType)?
            .parse::<WorkoutKind>()?;

        Ok(Self {
            workout_type,
            distance: read_u32(data, "distance")?,
            time: read_u32(data, "time")?,
            split_distance: read_u32(data, "split_distance")?,
            split_time: read_u32(data, "split_time")?,
        })
    }

    /// Checks the parameters against their kind and converts them to device
    /// units.
    ///
    /// # Errors
    ///
    /// - [`WorkoutError::MissingDistance`] for `fixed_distance` without a
    ///   positive `distance`.
    /// - [`WorkoutError::MissingTime`] for `fixed_time` without a positive
    ///   `time`.
    /// - [`WorkoutError::DurationOutOfRange`] when a duration overflows once
    ///   converted to hundredths of a second.
    pub fn validate(&self) -> Result<WorkoutPlan, WorkoutError> {
        let split_distance = self.split_distance.unwrap_or(0);
        let split_time = self.split_time.unwrap_or(0);

        match self.workout_type {
            WorkoutKind::JustRow => Ok(WorkoutPlan::JustRow {
                with_splits: split_distance > 0 || split_time > 0,
            }),

            WorkoutKind::FixedDistance => match self.distance {
                Some(meters) if meters > 0 => Ok(WorkoutPlan::FixedDistance {
                    meters,
                    split_meters: split_distance,
                }),
                _ => Err(WorkoutError::MissingDistance),
            },

            WorkoutKind::FixedTime => match self.time {
                Some(seconds) if seconds > 0 => Ok(WorkoutPlan::FixedTime {
                    duration_cs: to_centiseconds("time", seconds)?,
                    split_cs: to_centiseconds("split_time", split_time)?,
                }),
                _ => Err(WorkoutError::MissingTime),
            },
        }
    }
}

/// A validated workout, expressed in the units the monitor expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkoutPlan {
    JustRow { with_splits: bool },
    FixedDistance { meters: u32, split_meters: u32 },
    /// Durations in hundredths of a second.
    FixedTime { duration_cs: u32, split_cs: u32 },
}

impl WorkoutPlan {
    pub fn kind(&self) -> WorkoutKind {
        match self {
            WorkoutPlan::JustRow { .. } => WorkoutKind::JustRow,
            WorkoutPlan::FixedDistance { .. } => WorkoutKind::FixedDistance,
            WorkoutPlan::FixedTime { .. } => WorkoutKind::FixedTime,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_u32(data: &Map<String, Value>, field: &'static str) -> Result<Option<u32>, WorkoutError> {
    let Some(value) = data.get(field) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }

    let invalid = |reason: &str| WorkoutError::InvalidField {
        field,
        reason: reason.to_string(),
    };

    let number = value.as_f64().ok_or_else(|| invalid("not a number"))?;
    if !number.is_finite() || number < 0.0 {
        return Err(invalid("must be a non-negative number"));
    }
    if number > f64::from(u32::MAX) {
        return Err(invalid("too large"));
    }
    // Truncation toward zero is the intended conversion for fractional input.
    Ok(Some(number as u32))
}

fn to_centiseconds(field: &'static str, seconds: u32) -> Result<u32, WorkoutError> {
    seconds
        .checked_mul(CENTISECONDS_PER_SECOND)
        .ok_or(WorkoutError::DurationOutOfRange { field, seconds })
}
