//! The control loop: sole owner of the monitor handle.
//!
//! Every device operation, whether a subscriber command or a monitor-loop
//! poll, is a [`ControlCommand`] carrying its own oneshot reply channel.  A
//! single task receives commands in order and runs each to completion before
//! taking the next, so at most one device call is ever in flight.
//!
//! ```text
//! Router ─┐                          ┌─► ErgDevice (one call at a time)
//!         ├─► mpsc ─► control loop ──┤
//! Monitor ┘                          └─► DeviceInfoCell (writes)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use erg_core::{
    DeviceError, DeviceInfo, ErgDevice, WorkoutParams, WorkoutPlan, WorkoutState, WorkoutStats,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::DeviceControl;
use crate::domain::{ControlError, ControlRequest, ControlResponse};
use crate::infrastructure::device::info::DeviceInfoCell;

type Responder<T> = oneshot::Sender<Result<T, ControlError>>;

/// The device as lent to one command, if one is connected.
type DeviceRef<'a> = Option<&'a mut (dyn ErgDevice + 'static)>;

/// One unit of work for the control loop.
#[derive(Debug)]
pub(crate) enum ControlCommand {
    StartWorkout {
        params: WorkoutParams,
        reply: Responder<()>,
    },
    StopWorkout {
        reply: Responder<()>,
    },
    GetStatus {
        reply: oneshot::Sender<DeviceInfo>,
    },
    PollState {
        reply: Responder<WorkoutState>,
    },
    PollStats {
        reply: Responder<WorkoutStats>,
    },
    RefreshInfo {
        reply: Responder<DeviceInfo>,
    },
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Cloneable requester side of the control loop.
///
/// Each call is bounded by the control timeout, covering both the wait for
/// queue space and the wait for the reply.
#[derive(Debug, Clone)]
pub struct ControlClient {
    tx: mpsc::Sender<ControlCommand>,
    timeout: Duration,
}

impl ControlClient {
    pub(crate) fn new(tx: mpsc::Sender<ControlCommand>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(build(reply))
                .await
                .map_err(|_| ControlError::Stopped)?;
            response.await.map_err(|_| ControlError::Stopped)
        };
        timeout(self.timeout, exchange)
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    pub async fn start_workout(&self, params: WorkoutParams) -> Result<(), ControlError> {
        self.call(|reply| ControlCommand::StartWorkout { params, reply })
            .await?
    }

    pub async fn stop_workout(&self) -> Result<(), ControlError> {
        self.call(|reply| ControlCommand::StopWorkout { reply }).await?
    }

    /// Returns the cached device info; works with no device connected.
    pub async fn status(&self) -> Result<DeviceInfo, ControlError> {
        self.call(|reply| ControlCommand::GetStatus { reply }).await
    }

    pub(crate) async fn poll_state(&self) -> Result<WorkoutState, ControlError> {
        self.call(|reply| ControlCommand::PollState { reply }).await?
    }

    pub(crate) async fn poll_stats(&self) -> Result<WorkoutStats, ControlError> {
        self.call(|reply| ControlCommand::PollStats { reply }).await?
    }

    pub(crate) async fn refresh_info(&self) -> Result<DeviceInfo, ControlError> {
        self.call(|reply| ControlCommand::RefreshInfo { reply }).await?
    }
}

#[async_trait]
impl DeviceControl for ControlClient {
    async fn send_control(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        match request {
            ControlRequest::StartWorkout(params) => {
                self.start_workout(params).await.map(|()| ControlResponse::Done)
            }
            ControlRequest::StopWorkout => self.stop_workout().await.map(|()| ControlResponse::Done),
            ControlRequest::GetStatus => self.status().await.map(ControlResponse::Status),
        }
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────────

/// Runs until `stop` fires (or its sender is dropped), then closes the
/// request queue, serves whatever was already queued, and hands the device
/// back so the caller can disconnect it.
pub(crate) async fn run_control_loop(
    mut device: Option<Box<dyn ErgDevice>>,
    mut requests: mpsc::Receiver<ControlCommand>,
    info: DeviceInfoCell,
    mut stop: oneshot::Receiver<()>,
) -> Option<Box<dyn ErgDevice>> {
    let mut closing = false;

    loop {
        let command = tokio::select! {
            command = requests.recv() => command,
            _ = &mut stop, if !closing => {
                debug!("control loop draining");
                requests.close();
                closing = true;
                continue;
            }
        };
        let Some(command) = command else { break };
        execute(command, device.as_deref_mut(), &info).await;
    }

    debug!("control loop stopped");
    device
}

async fn execute(command: ControlCommand, device: DeviceRef<'_>, info: &DeviceInfoCell) {
    let delivered = match command {
        ControlCommand::StartWorkout { params, reply } => {
            reply.send(start_workout(device, &params).await).is_ok()
        }
        ControlCommand::StopWorkout { reply } => reply.send(stop_workout(device).await).is_ok(),
        ControlCommand::GetStatus { reply } => reply.send(info.get().await).is_ok(),
        ControlCommand::PollState { reply } => {
            let result = match device {
                Some(device) => device.workout_state().await.map_err(ControlError::from),
                None => Err(ControlError::NotConnected),
            };
            reply.send(result).is_ok()
        }
        ControlCommand::PollStats { reply } => reply.send(read_stats(device).await).is_ok(),
        ControlCommand::RefreshInfo { reply } => {
            let result = refresh_info(device, info).await;
            reply.send(result).is_ok()
        }
    };

    if !delivered {
        debug!("requester gone before the reply was ready");
    }
}

async fn start_workout(device: DeviceRef<'_>, params: &WorkoutParams) -> Result<(), ControlError> {
    let plan = params.validate()?;
    let device = device.ok_or(ControlError::NotConnected)?;

    match plan {
        WorkoutPlan::JustRow { with_splits } => device.start_just_row(with_splits).await?,
        WorkoutPlan::FixedDistance {
            meters,
            split_meters,
        } => device.start_fixed_distance(meters, split_meters).await?,
        WorkoutPlan::FixedTime {
            duration_cs,
            split_cs,
        } => device.start_fixed_time(duration_cs, split_cs).await?,
    }

    info!("started {} workout", plan.kind());
    Ok(())
}

async fn stop_workout(device: DeviceRef<'_>) -> Result<(), ControlError> {
    let device = device.ok_or(ControlError::NotConnected)?;
    device.terminate_workout().await?;
    info!("workout terminated");
    Ok(())
}

async fn read_stats(device: DeviceRef<'_>) -> Result<WorkoutStats, ControlError> {
    let device = device.ok_or(ControlError::NotConnected)?;
    let snapshot = device.workout_snapshot().await?;
    let op_state = device.operational_state().await.unwrap_or_else(|e| {
        debug!("operational state unavailable: {e}");
        String::new()
    });
    Ok(WorkoutStats::from_snapshot(&snapshot, op_state))
}

/// Re-reads every identity and status field, stores the result in `info`
/// and returns it.
///
/// A query that fails leaves its field at the default; the rest of the
/// record is still refreshed.  Only a missing device is an error.
async fn refresh_info(device: DeviceRef<'_>, info: &DeviceInfoCell) -> Result<DeviceInfo, ControlError> {
    let device = device.ok_or(ControlError::NotConnected)?;

    let version = or_default("version", device.version().await);
    let fresh = DeviceInfo {
        connected: true,
        serial: or_default("serial number", device.serial().await),
        model: version.model,
        battery: or_default("battery level", device.battery_level().await),
        erg_type: or_default("erg type", device.erg_type().await),
        op_state: or_default("operational state", device.operational_state().await),
    };
    info.replace(fresh.clone()).await;
    Ok(fresh)
}

fn or_default<T: Default>(field: &str, result: Result<T, DeviceError>) -> T {
    result.unwrap_or_else(|e| {
        warn!("{field} unavailable: {e}");
        T::default()
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
