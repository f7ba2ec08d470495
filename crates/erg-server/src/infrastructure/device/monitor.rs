//! The monitor loop: polls workout state and publishes events.
//!
//! The loop never touches the device directly.  Each poll is a request to
//! the control loop, so polling and subscriber commands share one
//! serialized path to the monitor.
//!
//! # Cadence
//!
//! | Situation                           | Period  |
//! |-------------------------------------|---------|
//! | before the first successful poll    | 500 ms  |
//! | workout in progress                 | 100 ms  |
//! | idle                                | 1 s     |
//!
//! The period is re-evaluated after every successful poll; a new period
//! starts counting from that moment.  A failed poll leaves the period alone.
//!
//! # Events per tick
//!
//! - State changed: `workout_state`, then `workout_started` or
//!   `workout_ended` when activity flipped.
//! - Idle and unchanged: one `workout_state`.
//! - Active: `workout_stats` (after any transition events).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use erg_core::protocol::messages::{TransitionNotice, WorkoutStateInfo};
use erg_core::{encode_event, is_workout_active, EventKind, WorkoutState};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::domain::{ControlError, PollIntervals};
use crate::infrastructure::device::control::ControlClient;
use crate::infrastructure::device::info::DeviceInfoCell;
use crate::infrastructure::hub::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Check,
    Active,
    Idle,
}

impl Cadence {
    fn period(self, intervals: &PollIntervals) -> Duration {
        match self {
            Self::Check => intervals.check,
            Self::Active => intervals.active,
            Self::Idle => intervals.idle,
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ── Task handle ───────────────────────────────────────────────────────────────

/// A running monitor loop.
pub(crate) struct MonitorTask {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl MonitorTask {
    pub(crate) fn spawn(
        client: ControlClient,
        info: DeviceInfoCell,
        sink: Arc<dyn EventSink>,
        intervals: PollIntervals,
    ) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let monitor = Monitor {
            client,
            info,
            sink,
            intervals,
            previous: None,
        };
        let join = tokio::spawn(monitor.run(stop_rx));
        Self { stop, join }
    }

    /// Stops the loop, abandoning any poll in progress, and waits for it.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.join.await {
            error!("monitor task failed: {e}");
        }
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────────

struct Monitor {
    client: ControlClient,
    info: DeviceInfoCell,
    sink: Arc<dyn EventSink>,
    intervals: PollIntervals,
    /// Last successfully polled state; `None` counts as idle.  Starting
    /// from `None` makes the first successful poll a transition.
    previous: Option<WorkoutState>,
}

impl Monitor {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let mut cadence = Cadence::Check;
        let mut ticks = ticker(cadence.period(&self.intervals));
        info!("monitor started");

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticks.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = &mut stop => break,
                outcome = self.tick() => outcome,
            };

            if let Some(next) = outcome {
                if next != cadence {
                    debug!("poll cadence {cadence:?} -> {next:?}");
                    cadence = next;
                    ticks = ticker(cadence.period(&self.intervals));
                }
            }
        }

        info!("monitor stopped");
    }

    /// Runs one poll.  Returns the cadence to continue with, or `None` when
    /// the poll failed and nothing was published.
    async fn tick(&mut self) -> Option<Cadence> {
        let state = match self.client.poll_state().await {
            Ok(state) => state,
            Err(ControlError::NotConnected) => {
                trace!("no device connected, skipping poll");
                return None;
            }
            Err(e) => {
                warn!("failed to get workout state: {e}");
                return None;
            }
        };

        let active = is_workout_active(state);
        let previous = self.previous.replace(state);
        let was_active = previous.is_some_and(is_workout_active);
        let changed = previous != Some(state);

        if changed {
            info!(
                "workout state {} -> {state}",
                previous.map_or("unknown", WorkoutState::as_str)
            );
            if let Err(e) = self.client.refresh_info().await {
                debug!("device info refresh failed: {e}");
            }
        }

        if changed || !active {
            let info = WorkoutStateInfo {
                operational_state: self.info.operational_state().await,
                workout_state: state,
                is_active: active,
            };
            self.publish(EventKind::WorkoutState, &info);
        }

        if changed && active && !was_active {
            self.publish(EventKind::WorkoutStarted, &TransitionNotice::started(state));
        } else if changed && !active && was_active {
            self.publish(EventKind::WorkoutEnded, &TransitionNotice::ended(state));
        }

        if active {
            match self.client.poll_stats().await {
                Ok(stats) => self.publish(EventKind::WorkoutStats, &stats),
                Err(e) => warn!("failed to get workout stats: {e}"),
            }
            Some(Cadence::Active)
        } else {
            Some(Cadence::Idle)
        }
    }

    fn publish<T: Serialize>(&self, kind: EventKind, data: &T) {
        match encode_event(kind, data, Utc::now()) {
            Ok(json) => {
                if !self.sink.broadcast(json) {
                    trace!("{} event dropped", kind.as_str());
                }
            }
            Err(e) => error!("failed to encode {} event: {e}", kind.as_str()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use erg_core::{DeviceError, ErgDevice, WorkoutSnapshot};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::infrastructure::device::control::run_control_loop;
    use crate::infrastructure::device::mock::{DeviceCall, MockErg};
    use crate::infrastructure::hub::MockEventSink;

    type Log = Arc<Mutex<Vec<Value>>>;

    struct Harness {
        monitor: MonitorTask,
        events: Log,
        started: Instant,
        _control_stop: oneshot::Sender<()>,
    }

    /// Starts a control loop around `erg` and a monitor publishing into a
    /// recording sink.
    fn start(erg: Option<MockErg>) -> Harness {
        let events: Log = Arc::default();
        let log = Arc::clone(&events);
        let mut sink = MockEventSink::new();
        sink.expect_broadcast().returning(move |payload| {
            let value = serde_json::from_str(&payload).expect("events are JSON");
            log.lock().unwrap().push(value);
            true
        });

        let (tx, rx) = mpsc::channel(8);
        let (control_stop, stop_rx) = oneshot::channel();
        let info = DeviceInfoCell::new();
        let device = erg.map(|e| Box::new(e) as Box<dyn ErgDevice>);
        tokio::spawn(run_control_loop(device, rx, info.clone(), stop_rx));

        let started = Instant::now();
        let client = ControlClient::new(tx, Duration::from_secs(10));
        let monitor = MonitorTask::spawn(client, info, Arc::new(sink), PollIntervals::default());
        Harness {
            monitor,
            events,
            started,
            _control_stop: control_stop,
        }
    }

    fn kinds(events: &Log) -> Vec<String> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn offsets_ms(erg: &MockErg, started: Instant) -> Vec<u128> {
        erg.state_polls()
            .into_iter()
            .map(|at| (at - started).as_millis())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_row_idle_sequence() {
        // Arrange: idle, rowing, finished
        let erg = MockErg::new();
        erg.script_states([
            Ok(WorkoutState::WaitToBegin),
            Ok(WorkoutState::WorkoutRow),
        ]);
        erg.set_resting_state(WorkoutState::WorkoutEnd);
        let h = start(Some(erg.clone()));

        // Act
        tokio::time::sleep(Duration::from_millis(2650)).await;
        h.monitor.stop().await;

        // Assert: check cadence first, 1 s after idle, 100 ms after rowing
        assert_eq!(offsets_ms(&erg, h.started), vec![500, 1500, 1600, 2600]);
        assert_eq!(
            kinds(&h.events),
            vec![
                "workout_state",
                "workout_state",
                "workout_started",
                "workout_stats",
                "workout_state",
                "workout_ended",
                "workout_state",
            ]
        );

        let events = h.events.lock().unwrap();
        assert_eq!(events[1]["data"]["workout_state"], "workout_row");
        assert_eq!(events[1]["data"]["is_active"], true);
        assert_eq!(events[2]["data"]["message"], "Workout started");
        assert_eq!(events[5]["data"]["message"], "Workout ended");
        assert_eq!(events[5]["data"]["state"], "workout_end");
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_ticks_stream_stats_only() {
        let erg = MockErg::new();
        erg.set_resting_state(WorkoutState::WorkoutRow);
        let h = start(Some(erg.clone()));

        // Ticks at 500, 600, 700, 800, 900 ms
        tokio::time::sleep(Duration::from_millis(950)).await;
        h.monitor.stop().await;

        let kinds = kinds(&h.events);
        assert_eq!(kinds.iter().filter(|k| *k == "workout_stats").count(), 5);
        assert_eq!(kinds.iter().filter(|k| *k == "workout_started").count(), 1);
        assert_eq!(kinds.iter().filter(|k| *k == "workout_state").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_is_a_transition_even_when_waiting() {
        // Arrange
        let erg = MockErg::new();
        erg.set_resting_state(WorkoutState::WaitToBegin);
        let h = start(Some(erg.clone()));

        // Act: only the first tick at 500 ms
        tokio::time::sleep(Duration::from_millis(600)).await;
        h.monitor.stop().await;

        // Assert: one state event, and the info cache was refreshed
        assert_eq!(kinds(&h.events), vec!["workout_state"]);
        let calls: Vec<DeviceCall> = erg.calls().into_iter().map(|c| c.call).collect();
        assert_eq!(calls.first(), Some(&DeviceCall::WorkoutState));
        assert!(calls.contains(&DeviceCall::Version));
    }

    fn first_stats(events: &Log) -> Value {
        events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e["type"] == "workout_stats")
            .map(|e| e["data"].clone())
            .expect("a workout_stats event was published")
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_event_carries_snapshot_and_operational_state() {
        // Arrange: a monitor mid-workout, 90.5 s in
        let erg = MockErg::new();
        erg.set_identity("430000042", "static_d", "workout");
        erg.set_resting_state(WorkoutState::WorkoutRow);
        erg.set_snapshot(WorkoutSnapshot {
            elapsed: Duration::from_millis(90_500),
            distance: 412.5,
            pace: Duration::from_millis(118_500),
            power: 203,
            stroke_rate: 24,
            calories: 31,
            workout_type: "just_row_splits".to_string(),
            rowing_state: "active".to_string(),
            ..WorkoutSnapshot::default()
        });
        let h = start(Some(erg));

        // Act
        tokio::time::sleep(Duration::from_millis(650)).await;
        h.monitor.stop().await;

        // Assert
        let stats = first_stats(&h.events);
        assert_eq!(stats["elapsed_time"], json!(90.5));
        assert_eq!(stats["distance"], json!(412.5));
        assert_eq!(stats["pace"], json!(118.5));
        assert_eq!(stats["power"], json!(203));
        assert_eq!(stats["stroke_rate"], json!(24));
        assert_eq!(stats["calories"], json!(31));
        assert_eq!(stats["workout_type"], "just_row_splits");
        assert_eq!(stats["rowing_state"], "active");
        assert_eq!(stats["operational_state"], "workout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_still_published_when_operational_state_fails() {
        // Arrange
        let erg = MockErg::new();
        erg.set_resting_state(WorkoutState::WorkoutRow);
        erg.set_snapshot(WorkoutSnapshot {
            elapsed: Duration::from_secs(12),
            ..WorkoutSnapshot::default()
        });
        erg.fail_query(DeviceCall::OperationalState, DeviceError::Timeout);
        let h = start(Some(erg));

        // Act
        tokio::time::sleep(Duration::from_millis(650)).await;
        h.monitor.stop().await;

        // Assert
        let stats = first_stats(&h.events);
        assert_eq!(stats["elapsed_time"], json!(12.0));
        assert_eq!(stats["operational_state"], "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_is_skipped_without_cadence_change() {
        // Arrange: the first poll fails while still on the check cadence
        let erg = MockErg::new();
        erg.script_states([Err(DeviceError::Timeout)]);
        erg.set_resting_state(WorkoutState::WaitToBegin);
        let h = start(Some(erg.clone()));

        // Act
        tokio::time::sleep(Duration::from_millis(2100)).await;
        h.monitor.stop().await;

        // Assert: retried 500 ms later, then idle cadence
        assert_eq!(offsets_ms(&erg, h.started), vec![500, 1000, 2000]);
        assert_eq!(kinds(&h.events), vec!["workout_state", "workout_state"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_idle_keeps_idle_cadence() {
        let erg = MockErg::new();
        erg.script_states([Ok(WorkoutState::WaitToBegin), Err(DeviceError::Timeout)]);
        erg.set_resting_state(WorkoutState::WaitToBegin);
        let h = start(Some(erg.clone()));

        tokio::time::sleep(Duration::from_millis(2600)).await;
        h.monitor.stop().await;

        assert_eq!(offsets_ms(&erg, h.started), vec![500, 1500, 2500]);
        assert_eq!(kinds(&h.events), vec!["workout_state", "workout_state"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_publishes_nothing() {
        let h = start(None);

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.monitor.stop().await;

        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_event_carries_cached_operational_state() {
        let erg = MockErg::new();
        erg.set_identity("430000001", "static_d", "ready");
        erg.set_resting_state(WorkoutState::WaitToBegin);
        let h = start(Some(erg));

        tokio::time::sleep(Duration::from_millis(600)).await;
        h.monitor.stop().await;

        let events = h.events.lock().unwrap();
        assert_eq!(events[0]["data"]["operational_state"], "ready");
        assert_eq!(events[0]["data"]["is_active"], false);
    }
}
