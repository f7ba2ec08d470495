//! Composition root: wires the hub, device manager, router and listener
//! together and tears them down in order.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use erg_core::DeviceDiscovery;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::application::Router;
use crate::domain::ServerConfig;
use crate::infrastructure::device::DeviceManager;
use crate::infrastructure::hub::{Hub, HubTask};
use crate::infrastructure::ws_server::{bind, run_server};

/// A running server.
pub struct Service {
    local_addr: SocketAddr,
    hub_task: HubTask,
    manager: DeviceManager,
    stop_accepting: watch::Sender<bool>,
    server: JoinHandle<JoinSet<()>>,
}

impl Service {
    /// Binds the listener, connects to a monitor found by `discovery` and
    /// starts every loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.  A missing monitor
    /// is not an error.
    pub async fn start(config: ServerConfig, discovery: &dyn DeviceDiscovery) -> anyhow::Result<Self> {
        let listener = bind(config.bind_addr).await?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        let (hub, hub_handle) = Hub::new();
        let manager = DeviceManager::start(discovery, Arc::new(hub_handle.clone()), &config).await;
        let hub_task = hub.spawn(Arc::new(Router::new(manager.client())));

        let (stop_accepting, stop_rx) = watch::channel(false);
        let server = tokio::spawn(run_server(
            listener,
            hub_handle,
            config.connection,
            stop_rx,
        ));

        Ok(Self {
            local_addr,
            hub_task,
            manager,
            stop_accepting,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True while the device manager holds a connected monitor.
    pub async fn device_connected(&self) -> bool {
        self.manager.is_connected().await
    }

    /// Stops accepting, shuts down the device manager, then the hub, then
    /// waits for every connection to close.
    pub async fn shutdown(self) {
        let _ = self.stop_accepting.send(true);
        let mut connections = match self.server.await {
            Ok(connections) => connections,
            Err(e) => {
                error!("accept loop failed: {e}");
                JoinSet::new()
            }
        };

        self.manager.shutdown().await;
        self.hub_task.shutdown().await;

        while let Some(result) = connections.join_next().await {
            if let Err(e) = result {
                error!("connection task failed: {e}");
            }
        }
        info!("server stopped");
    }
}
