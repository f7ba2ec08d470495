//! Cached information about the connected monitor.

use serde::{Deserialize, Serialize};

/// Snapshot of what the server knows about its monitor.
///
/// The default value describes "no monitor": `connected` is `false` and every
/// other field is empty.  That is also what `get_status` reports when the
/// server started without finding a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub connected: bool,
    pub serial: String,
    pub model: u16,
    /// Battery level in percent.
    pub battery: u8,
    pub erg_type: String,
    #[serde(rename = "operational_state")]
    pub op_state: String,
}

impl DeviceInfo {
    /// Returns an info record for a connected device whose details have not
    /// been queried yet.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }
}
