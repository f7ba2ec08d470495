//! Shared cache of the monitor's identity and status.

use std::sync::Arc;

use erg_core::DeviceInfo;
use tokio::sync::RwLock;

/// The last [`DeviceInfo`] read from the monitor.
///
/// Only the control loop writes it; the control loop (for `get_status`) and
/// the monitor loop (for the operational state of `workout_state` events)
/// read it.  Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfoCell {
    inner: Arc<RwLock<DeviceInfo>>,
}

impl DeviceInfoCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> DeviceInfo {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, info: DeviceInfo) {
        *self.inner.write().await = info;
    }

    pub async fn operational_state(&self) -> String {
        self.inner.read().await.op_state.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }
}
