//! Device manager: connects to a monitor and runs the control and monitor
//! loops around it.
//!
//! # Lifecycle
//!
//! 1. [`DeviceManager::start`] enumerates monitors and connects to the
//!    first one.  Finding none, or failing to connect, is logged and the
//!    server keeps running without a device: `get_status` reports
//!    `connected: false` and commands fail with "device not connected".
//! 2. The control loop takes ownership of the device.
//! 3. Device info is read once, then the monitor loop starts.
//! 4. [`DeviceManager::shutdown`] stops the monitor loop, drains the control
//!    loop and disconnects the device.

use std::sync::Arc;

use async_trait::async_trait;
use erg_core::{DeviceDiscovery, DeviceError, ErgDevice};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::config::CONTROL_QUEUE_SIZE;
use crate::domain::ServerConfig;
use crate::infrastructure::device::control::{run_control_loop, ControlClient};
use crate::infrastructure::device::info::DeviceInfoCell;
use crate::infrastructure::device::monitor::MonitorTask;
use crate::infrastructure::hub::EventSink;

/// Discovery for hosts with no monitor attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevices;

#[async_trait]
impl DeviceDiscovery for NoDevices {
    async fn enumerate(&self) -> Result<Vec<Box<dyn ErgDevice>>, DeviceError> {
        Ok(Vec::new())
    }
}

/// Finds the first monitor and opens it.
async fn connect_first(discovery: &dyn DeviceDiscovery) -> Result<Box<dyn ErgDevice>, DeviceError> {
    let mut device = discovery
        .enumerate()
        .await?
        .into_iter()
        .next()
        .ok_or(DeviceError::NotFound)?;
    device.connect().await?;
    Ok(device)
}

/// Owns the control and monitor loops for one monitor.
pub struct DeviceManager {
    client: ControlClient,
    info: DeviceInfoCell,
    control_stop: oneshot::Sender<()>,
    control_task: JoinHandle<Option<Box<dyn ErgDevice>>>,
    monitor: MonitorTask,
}

impl DeviceManager {
    /// Connects (if possible) and starts both loops.  Never fails: a missing
    /// monitor leaves the manager running in disconnected mode.
    pub async fn start(
        discovery: &dyn DeviceDiscovery,
        sink: Arc<dyn EventSink>,
        config: &ServerConfig,
    ) -> Self {
        let device = match connect_first(discovery).await {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("failed to connect to performance monitor: {e}");
                None
            }
        };
        let connected = device.is_some();

        let info = DeviceInfoCell::new();
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let (control_stop, stop_rx) = oneshot::channel();
        let control_task = tokio::spawn(run_control_loop(device, rx, info.clone(), stop_rx));
        let client = ControlClient::new(tx, config.control_timeout);

        if connected {
            match client.refresh_info().await {
                Ok(fresh) => info!(
                    serial = %fresh.serial,
                    model = fresh.model,
                    "connected to performance monitor ({})",
                    fresh.erg_type
                ),
                Err(e) => warn!("failed to read device info: {e}"),
            }
        }

        let monitor = MonitorTask::spawn(client.clone(), info.clone(), sink, config.poll);

        Self {
            client,
            info,
            control_stop,
            control_task,
            monitor,
        }
    }

    /// A requester for the control loop, for the router.
    pub fn client(&self) -> ControlClient {
        self.client.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.info.is_connected().await
    }

    /// Stops the monitor loop, then the control loop, then disconnects the
    /// device.  Requests still queued are served before the control loop
    /// exits; later requests fail with "device manager is not running".
    pub async fn shutdown(self) {
        info!("shutting down device manager");
        self.monitor.stop().await;

        let _ = self.control_stop.send(());
        match self.control_task.await {
            Ok(Some(mut device)) => {
                if let Err(e) = device.disconnect().await {
                    warn!("failed to disconnect performance monitor: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => error!("control loop failed: {e}"),
        }

        info!("device manager stopped");
    }
}
