//! Workout state as reported by the performance monitor.
//!
//! The monitor exposes a single byte describing where the current workout is
//! in its lifecycle.  The server cares about one derived fact: is somebody
//! rowing right now?  That boolean drives both the polling cadence and the
//! `workout_started` / `workout_ended` events, so it is computed in exactly
//! one place: [`is_workout_active`].
//!
//! ```text
//! wait_to_begin ──► workout_row ──► workout_end ──► workout_logged
//!                        │
//!                        └──► interval_* sub-states (work / rest / transitions)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workout state byte reported by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkoutState {
    /// Waiting for the rower to take the first stroke.
    #[default]
    WaitToBegin = 0,
    WorkoutRow = 1,
    CountdownPause = 2,
    IntervalRest = 3,
    IntervalWorkTime = 4,
    IntervalWorkDistance = 5,
    IntervalRestEndToWorkTime = 6,
    IntervalRestEndToWorkDistance = 7,
    IntervalWorkTimeToRest = 8,
    IntervalWorkDistanceToRest = 9,
    WorkoutEnd = 10,
    Terminate = 11,
    WorkoutLogged = 12,
    Rearm = 13,
}

impl WorkoutState {
    /// Returns the snake_case label used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkoutState::WaitToBegin => "wait_to_begin",
            WorkoutState::WorkoutRow => "workout_row",
            WorkoutState::CountdownPause => "countdown_pause",
            WorkoutState::IntervalRest => "interval_rest",
            WorkoutState::IntervalWorkTime => "interval_work_time",
            WorkoutState::IntervalWorkDistance => "interval_work_distance",
            WorkoutState::IntervalRestEndToWorkTime => "interval_rest_end_to_work_time",
            WorkoutState::IntervalRestEndToWorkDistance => "interval_rest_end_to_work_distance",
            WorkoutState::IntervalWorkTimeToRest => "interval_work_time_to_rest",
            WorkoutState::IntervalWorkDistanceToRest => "interval_work_distance_to_rest",
            WorkoutState::WorkoutEnd => "workout_end",
            WorkoutState::Terminate => "terminate",
            WorkoutState::WorkoutLogged => "workout_logged",
            WorkoutState::Rearm => "rearm",
        }
    }
}

impl TryFrom<u8> for WorkoutState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(WorkoutState::WaitToBegin),
            1 => Ok(WorkoutState::WorkoutRow),
            2 => Ok(WorkoutState::CountdownPause),
            3 => Ok(WorkoutState::IntervalRest),
            4 => Ok(WorkoutState::IntervalWorkTime),
            5 => Ok(WorkoutState::IntervalWorkDistance),
            6 => Ok(WorkoutState::IntervalRestEndToWorkTime),
            7 => Ok(WorkoutState::IntervalRestEndToWorkDistance),
            8 => Ok(WorkoutState::IntervalWorkTimeToRest),
            9 => Ok(WorkoutState::IntervalWorkDistanceToRest),
            10 => Ok(WorkoutState::WorkoutEnd),
            11 => Ok(WorkoutState::Terminate),
            12 => Ok(WorkoutState::WorkoutLogged),
            13 => Ok(WorkoutState::Rearm),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` when the state means a rower is actively working.
///
/// Plain rowing and every interval sub-state (including rests and the
/// transitions between work and rest) count as active.  Waiting, countdown,
/// end-of-workout and logging states are idle.
pub fn is_workout_active(state: WorkoutState) -> bool {
    matches!(
        state,
        WorkoutState::WorkoutRow
            | WorkoutState::IntervalWorkTime
            | WorkoutState::IntervalWorkDistance
            | WorkoutState::IntervalRest
            | WorkoutState::IntervalRestEndToWorkTime
            | WorkoutState::IntervalRestEndToWorkDistance
            | WorkoutState::IntervalWorkTimeToRest
            | WorkoutState::IntervalWorkDistanceToRest
    )
}
