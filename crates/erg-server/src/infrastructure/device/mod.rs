//! Everything that talks to the performance monitor.
//!
//! - `control`   – the control loop actor and its client
//! - `monitor`   – adaptive state polling and event publication
//! - `manager`   – startup, wiring and ordered shutdown of both loops
//! - `info`      – cached device information
//! - `simulated` – a software monitor for running without hardware
//! - `mock`      – a scripted monitor for tests

pub mod control;
pub mod info;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod simulated;

pub use control::ControlClient;
pub use info::DeviceInfoCell;
pub use manager::{DeviceManager, NoDevices};
pub use simulated::{SimulatedDiscovery, SimulatedErg};
