//! Scripted in-memory monitor for tests.
//!
//! `MockErg` is cheap to clone; every clone shares the same script and call
//! log, so a test keeps one clone for inspection and hands another (boxed) to
//! the device manager.
//!
//! - Workout-state queries pop from a script, then repeat a resting state.
//! - Every call is recorded with its start and finish instants.
//! - Any single query can be made to fail with [`MockErg::fail_query`].
//! - An optional latency makes overlapping calls observable: if a second call
//!   begins while one is still sleeping, [`MockErg::overlapped`] turns true.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use erg_core::{
    DeviceDiscovery, DeviceError, DeviceVersion, ErgDevice, WorkoutSnapshot, WorkoutState,
};
use tokio::time::Instant;

/// One driver call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Connect,
    Disconnect,
    Version,
    Serial,
    BatteryLevel,
    ErgType,
    OperationalState,
    WorkoutState,
    WorkoutSnapshot,
    StartJustRow { with_splits: bool },
    StartFixedDistance { meters: u32, split_meters: u32 },
    StartFixedTime { duration_cs: u32, split_cs: u32 },
    TerminateWorkout,
}

impl DeviceCall {
    /// True for calls that change what the monitor is doing.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::StartJustRow { .. }
                | Self::StartFixedDistance { .. }
                | Self::StartFixedTime { .. }
                | Self::TerminateWorkout
        )
    }
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call: DeviceCall,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Result<WorkoutState, DeviceError>>,
    resting: WorkoutState,
    serial: String,
    erg_type: String,
    op_state: String,
    snapshot: WorkoutSnapshot,
    latency: Duration,
    command_error: Option<DeviceError>,
    connect_error: Option<DeviceError>,
    query_errors: Vec<(DeviceCall, DeviceError)>,
    calls: Vec<CallRecord>,
    in_flight: bool,
    overlapped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockErg {
    state: Arc<Mutex<MockState>>,
}

impl MockErg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call take `latency` to complete.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Queues results for upcoming workout-state queries.
    pub fn script_states<I>(&self, states: I)
    where
        I: IntoIterator<Item = Result<WorkoutState, DeviceError>>,
    {
        self.lock().script.extend(states);
    }

    /// State reported once the script runs out.
    pub fn set_resting_state(&self, state: WorkoutState) {
        self.lock().resting = state;
    }

    pub fn set_identity(&self, serial: &str, erg_type: &str, op_state: &str) {
        let mut state = self.lock();
        state.serial = serial.to_string();
        state.erg_type = erg_type.to_string();
        state.op_state = op_state.to_string();
    }

    pub fn set_snapshot(&self, snapshot: WorkoutSnapshot) {
        self.lock().snapshot = snapshot;
    }

    /// Makes start and terminate commands fail with `error`.
    pub fn fail_commands(&self, error: DeviceError) {
        self.lock().command_error = Some(error);
    }

    pub fn fail_connect(&self, error: DeviceError) {
        self.lock().connect_error = Some(error);
    }

    /// Makes every later `call` fail with `error`, leaving other calls alone.
    pub fn fail_query(&self, call: DeviceCall, error: DeviceError) {
        self.lock().query_errors.push((call, error));
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Start and terminate calls, in order.
    pub fn commands(&self) -> Vec<DeviceCall> {
        self.lock()
            .calls
            .iter()
            .map(|record| record.call.clone())
            .filter(DeviceCall::is_command)
            .collect()
    }

    /// Instants at which workout-state queries were issued.
    pub fn state_polls(&self) -> Vec<Instant> {
        self.lock()
            .calls
            .iter()
            .filter(|record| record.call == DeviceCall::WorkoutState)
            .map(|record| record.started)
            .collect()
    }

    /// True if two calls were ever in flight at the same time.
    pub fn overlapped(&self) -> bool {
        self.lock().overlapped
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    async fn perform<T>(
        &self,
        call: DeviceCall,
        respond: impl FnOnce(&mut MockState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let started = Instant::now();
        let latency = {
            let mut state = self.lock();
            if state.in_flight {
                state.overlapped = true;
            }
            state.in_flight = true;
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.in_flight = false;
        let injected = state
            .query_errors
            .iter()
            .find(|(failing, _)| *failing == call)
            .map(|(_, error)| error.clone());
        let result = match injected {
            Some(error) => Err(error),
            None => respond(&mut state),
        };
        state.calls.push(CallRecord {
            call,
            started,
            finished: Instant::now(),
        });
        result
    }

    fn command_result(state: &mut MockState) -> Result<(), DeviceError> {
        match &state.command_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ErgDevice for MockErg {
    async fn connect(&mut self) -> Result<(), DeviceError> {
        self.perform(DeviceCall::Connect, |s| match &s.connect_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.perform(DeviceCall::Disconnect, |_| Ok(())).await
    }

    async fn version(&mut self) -> Result<DeviceVersion, DeviceError> {
        self.perform(DeviceCall::Version, |_| {
            Ok(DeviceVersion {
                model: 5,
                hardware_version: 1,
                firmware_version: 171,
            })
        })
        .await
    }

    async fn serial(&mut self) -> Result<String, DeviceError> {
        self.perform(DeviceCall::Serial, |s| Ok(s.serial.clone())).await
    }

    async fn battery_level(&mut self) -> Result<u8, DeviceError> {
        self.perform(DeviceCall::BatteryLevel, |_| Ok(100)).await
    }

    async fn erg_type(&mut self) -> Result<String, DeviceError> {
        self.perform(DeviceCall::ErgType, |s| Ok(s.erg_type.clone())).await
    }

    async fn operational_state(&mut self) -> Result<String, DeviceError> {
        self.perform(DeviceCall::OperationalState, |s| Ok(s.op_state.clone()))
            .await
    }

    async fn workout_state(&mut self) -> Result<WorkoutState, DeviceError> {
        self.perform(DeviceCall::WorkoutState, |s| {
            s.script.pop_front().unwrap_or(Ok(s.resting))
        })
        .await
    }

    async fn workout_snapshot(&mut self) -> Result<WorkoutSnapshot, DeviceError> {
        self.perform(DeviceCall::WorkoutSnapshot, |s| Ok(s.snapshot.clone()))
            .await
    }

    async fn start_just_row(&mut self, with_splits: bool) -> Result<(), DeviceError> {
        self.perform(DeviceCall::StartJustRow { with_splits }, Self::command_result)
            .await
    }

    async fn start_fixed_distance(
        &mut self,
        meters: u32,
        split_meters: u32,
    ) -> Result<(), DeviceError> {
        self.perform(
            DeviceCall::StartFixedDistance {
                meters,
                split_meters,
            },
            Self::command_result,
        )
        .await
    }

    async fn start_fixed_time(&mut self, duration_cs: u32, split_cs: u32) -> Result<(), DeviceError> {
        self.perform(
            DeviceCall::StartFixedTime {
                duration_cs,
                split_cs,
            },
            Self::command_result,
        )
        .await
    }

    async fn terminate_workout(&mut self) -> Result<(), DeviceError> {
        self.perform(DeviceCall::TerminateWorkout, Self::command_result)
            .await
    }
}

/// Discovery that always finds the given mock (a clone sharing its state).
#[async_trait]
impl DeviceDiscovery for MockErg {
    async fn enumerate(&self) -> Result<Vec<Box<dyn ErgDevice>>, DeviceError> {
        Ok(vec![Box::new(self.clone())])
    }
}
