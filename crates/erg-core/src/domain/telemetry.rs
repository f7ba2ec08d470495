//! Telemetry records.
//!
//! [`WorkoutSnapshot`] is what the driver returns: typed durations and the
//! monitor's own labels.  [`WorkoutStats`] is what subscribers receive: the
//! same numbers flattened into JSON-friendly units (seconds as floats, watts as
//! integers) plus the operational state, which the monitor reports through a
//! separate query.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A point-in-time reading of the current workout, as returned by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutSnapshot {
    pub elapsed: Duration,
    /// Meters rowed so far.
    pub distance: f64,
    /// Current pace, time per 500 m.
    pub pace: Duration,
    /// Average pace, time per 500 m.
    pub avg_pace: Duration,
    pub power: u16,
    pub avg_power: u16,
    pub stroke_rate: u8,
    pub avg_stroke_rate: u8,
    pub calories: u32,
    /// Beats per minute; 0 means no heart-rate belt is paired.
    pub heart_rate: u8,
    pub avg_heart_rate: u8,
    pub drag_factor: u8,
    pub workout_type: String,
    pub workout_state: String,
    pub rowing_state: String,
    pub stroke_state: String,
}

/// Real-time workout statistics as broadcast in `workout_stats` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStats {
    /// Seconds.
    pub elapsed_time: f64,
    /// Meters.
    pub distance: f64,
    /// Seconds per 500 m.
    pub pace: f64,
    /// Seconds per 500 m.
    pub avg_pace: f64,
    /// Watts.
    pub power: u32,
    pub avg_power: u32,
    /// Strokes per minute.
    pub stroke_rate: u8,
    pub avg_stroke_rate: u8,
    pub calories: u32,
    pub heart_rate: u8,
    pub avg_heart_rate: u8,
    pub drag_factor: u8,

    pub workout_type: String,
    pub workout_state: String,
    pub rowing_state: String,
    pub stroke_state: String,
    #[serde(rename = "operational_state")]
    pub op_state: String,
}

impl WorkoutStats {
    /// Converts a driver snapshot, attaching the separately queried
    /// operational state (empty when that query failed).
    pub fn from_snapshot(snapshot: &WorkoutSnapshot, op_state: String) -> Self {
        Self {
            elapsed_time: snapshot.elapsed.as_secs_f64(),
            distance: snapshot.distance,
            pace: snapshot.pace.as_secs_f64(),
            avg_pace: snapshot.avg_pace.as_secs_f64(),
            power: u32::from(snapshot.power),
            avg_power: u32::from(snapshot.avg_power),
            stroke_rate: snapshot.stroke_rate,
            avg_stroke_rate: snapshot.avg_stroke_rate,
            calories: snapshot.calories,
            heart_rate: snapshot.heart_rate,
            avg_heart_rate: snapshot.avg_heart_rate,
            drag_factor: snapshot.drag_factor,
            workout_type: snapshot.workout_type.clone(),
            workout_state: snapshot.workout_state.clone(),
            rowing_state: snapshot.rowing_state.clone(),
            stroke_state: snapshot.stroke_state.clone(),
            op_state,
        }
    }
}
