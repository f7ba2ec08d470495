//! Software stand-in for a rowing monitor, enabled with `--simulate`.
//!
//! The simulated rower holds a steady 2:00/500 m pace at 24 strokes per
//! minute from the moment a workout is programmed.  Fixed-distance and
//! fixed-time workouts end on their own when the target is reached;
//! terminating returns the monitor to `wait_to_begin`.

use std::time::Duration;

use async_trait::async_trait;
use erg_core::domain::workout::CENTISECONDS_PER_SECOND;
use erg_core::{
    DeviceDiscovery, DeviceError, DeviceVersion, ErgDevice, WorkoutPlan, WorkoutSnapshot,
    WorkoutState,
};
use tokio::time::Instant;
use tracing::debug;

const PACE: Duration = Duration::from_secs(120);
const STROKE_RATE: u8 = 24;
const DRAG_FACTOR: u8 = 120;

fn meters_per_second() -> f64 {
    500.0 / PACE.as_secs_f64()
}

/// Concept2 power formula: watts = 2.80 / (seconds per meter)^3.
fn watts() -> u16 {
    let seconds_per_meter = PACE.as_secs_f64() / 500.0;
    (2.8 / seconds_per_meter.powi(3)).round() as u16
}

#[derive(Debug)]
struct Session {
    plan: WorkoutPlan,
    started: Instant,
}

impl Session {
    /// Time rowed, capped at the workout's target.
    fn elapsed(&self) -> Duration {
        let elapsed = self.started.elapsed();
        match self.plan {
            WorkoutPlan::FixedTime { duration_cs, .. } => {
                let target = Duration::from_millis(u64::from(duration_cs) * 10);
                elapsed.min(target)
            }
            WorkoutPlan::FixedDistance { meters, .. } => {
                let target = Duration::from_secs_f64(f64::from(meters) / meters_per_second());
                elapsed.min(target)
            }
            WorkoutPlan::JustRow { .. } => elapsed,
        }
    }

    fn distance(&self) -> f64 {
        self.elapsed().as_secs_f64() * meters_per_second()
    }

    fn finished(&self) -> bool {
        match self.plan {
            WorkoutPlan::FixedTime { duration_cs, .. } => {
                self.started.elapsed().as_millis() / 10 >= u128::from(duration_cs)
            }
            WorkoutPlan::FixedDistance { meters, .. } => {
                self.started.elapsed().as_secs_f64() * meters_per_second() >= f64::from(meters)
            }
            WorkoutPlan::JustRow { .. } => false,
        }
    }

    fn type_label(&self) -> &'static str {
        match self.plan {
            WorkoutPlan::JustRow { with_splits: true } => "just_row_splits",
            WorkoutPlan::JustRow { with_splits: false } => "just_row_no_splits",
            WorkoutPlan::FixedDistance { split_meters: 0, .. } => "fixed_distance_no_splits",
            WorkoutPlan::FixedDistance { .. } => "fixed_distance_splits",
            WorkoutPlan::FixedTime { split_cs: 0, .. } => "fixed_time_no_splits",
            WorkoutPlan::FixedTime { .. } => "fixed_time_splits",
        }
    }
}

/// An in-memory monitor driven by the tokio clock.
#[derive(Debug, Default)]
pub struct SimulatedErg {
    connected: bool,
    session: Option<Session>,
}

impl SimulatedErg {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::Io("simulated monitor not connected".to_string()))
        }
    }

    fn state(&self) -> WorkoutState {
        match &self.session {
            None => WorkoutState::WaitToBegin,
            Some(session) if session.finished() => WorkoutState::WorkoutEnd,
            Some(_) => WorkoutState::WorkoutRow,
        }
    }

    fn begin(&mut self, plan: WorkoutPlan) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        debug!("simulated {} workout started", plan.kind());
        self.session = Some(Session {
            plan,
            started: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl ErgDevice for SimulatedErg {
    async fn connect(&mut self) -> Result<(), DeviceError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = false;
        self.session = None;
        Ok(())
    }

    async fn version(&mut self) -> Result<DeviceVersion, DeviceError> {
        self.ensure_connected()?;
        Ok(DeviceVersion {
            model: 5,
            hardware_version: 1,
            firmware_version: 1,
        })
    }

    async fn serial(&mut self) -> Result<String, DeviceError> {
        self.ensure_connected()?;
        Ok("SIM000001".to_string())
    }

    async fn battery_level(&mut self) -> Result<u8, DeviceError> {
        self.ensure_connected()?;
        Ok(100)
    }

    async fn erg_type(&mut self) -> Result<String, DeviceError> {
        self.ensure_connected()?;
        Ok("static_d".to_string())
    }

    async fn operational_state(&mut self) -> Result<String, DeviceError> {
        self.ensure_connected()?;
        let label = match self.state() {
            WorkoutState::WaitToBegin => "ready",
            WorkoutState::WorkoutEnd => "workout_end",
            _ => "workout",
        };
        Ok(label.to_string())
    }

    async fn workout_state(&mut self) -> Result<WorkoutState, DeviceError> {
        self.ensure_connected()?;
        Ok(self.state())
    }

    async fn workout_snapshot(&mut self) -> Result<WorkoutSnapshot, DeviceError> {
        self.ensure_connected()?;
        let state = self.state();
        let Some(session) = &self.session else {
            return Ok(WorkoutSnapshot {
                workout_state: state.as_str().to_string(),
                rowing_state: "inactive".to_string(),
                drag_factor: DRAG_FACTOR,
                ..WorkoutSnapshot::default()
            });
        };

        let rowing = state == WorkoutState::WorkoutRow;
        let elapsed = session.elapsed();
        let power = if rowing { watts() } else { 0 };
        Ok(WorkoutSnapshot {
            elapsed,
            distance: session.distance(),
            pace: if rowing { PACE } else { Duration::ZERO },
            avg_pace: PACE,
            power,
            avg_power: watts(),
            stroke_rate: if rowing { STROKE_RATE } else { 0 },
            avg_stroke_rate: STROKE_RATE,
            // Roughly 300 W of total metabolic output at this pace.
            calories: (elapsed.as_secs_f64() * 300.0 / 4184.0).round() as u32,
            heart_rate: 0,
            avg_heart_rate: 0,
            drag_factor: DRAG_FACTOR,
            workout_type: session.type_label().to_string(),
            workout_state: state.as_str().to_string(),
            rowing_state: if rowing { "active" } else { "inactive" }.to_string(),
            stroke_state: if rowing { "drive" } else { "waiting_for_wheel_to_reach_min_speed" }
                .to_string(),
        })
    }

    async fn start_just_row(&mut self, with_splits: bool) -> Result<(), DeviceError> {
        self.begin(WorkoutPlan::JustRow { with_splits })
    }

    async fn start_fixed_distance(
        &mut self,
        meters: u32,
        split_meters: u32,
    ) -> Result<(), DeviceError> {
        self.begin(WorkoutPlan::FixedDistance {
            meters,
            split_meters,
        })
    }

    async fn start_fixed_time(&mut self, duration_cs: u32, split_cs: u32) -> Result<(), DeviceError> {
        if duration_cs < CENTISECONDS_PER_SECOND {
            return Err(DeviceError::Rejected("duration shorter than one second".to_string()));
        }
        self.begin(WorkoutPlan::FixedTime {
            duration_cs,
            split_cs,
        })
    }

    async fn terminate_workout(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.session = None;
        Ok(())
    }
}

/// Discovery that always finds exactly one simulated monitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedDiscovery;

#[async_trait]
impl DeviceDiscovery for SimulatedDiscovery {
    async fn enumerate(&self) -> Result<Vec<Box<dyn ErgDevice>>, DeviceError> {
        Ok(vec![Box::new(SimulatedErg::new())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected() -> SimulatedErg {
        let mut erg = SimulatedErg::new();
        erg.connect().await.unwrap();
        erg
    }

    #[test]
    fn test_power_at_two_minute_pace() {
        // 2.8 / 0.24^3 ≈ 202.5 W
        assert_eq!(watts(), 203);
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let mut erg = SimulatedErg::new();
        assert!(erg.workout_state().await.is_err());
        assert!(erg.start_just_row(false).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_until_started() {
        let mut erg = connected().await;

        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WaitToBegin));
        assert_eq!(erg.operational_state().await.unwrap(), "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_distance_ends_at_target() {
        // Arrange: 500 m at 2:00/500 m takes two minutes
        let mut erg = connected().await;
        erg.start_fixed_distance(500, 0).await.unwrap();

        // Act / Assert: halfway
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WorkoutRow));
        let snapshot = erg.workout_snapshot().await.unwrap();
        assert!((snapshot.distance - 250.0).abs() < 1.0);
        assert_eq!(snapshot.stroke_rate, STROKE_RATE);

        // Past the target: finished, distance capped
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WorkoutEnd));
        let snapshot = erg.workout_snapshot().await.unwrap();
        assert!((snapshot.distance - 500.0).abs() < 1e-6);
        assert_eq!(snapshot.power, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_time_ends_after_duration() {
        let mut erg = connected().await;
        erg.start_fixed_time(6000, 0).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WorkoutRow));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WorkoutEnd));
        assert_eq!(
            erg.workout_snapshot().await.unwrap().elapsed,
            Duration::from_secs(60)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_returns_to_idle() {
        let mut erg = connected().await;
        erg.start_just_row(true).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            erg.workout_snapshot().await.unwrap().workout_type,
            "just_row_splits"
        );

        erg.terminate_workout().await.unwrap();

        assert_eq!(erg.workout_state().await, Ok(WorkoutState::WaitToBegin));
    }
}
