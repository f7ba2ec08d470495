//! erg-server library crate.
//!
//! Streams live telemetry from one rowing performance monitor to any number
//! of WebSocket subscribers, and lets any subscriber start or stop a workout.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browsers / dashboards (JSON over WebSocket)
//!         ↕
//! [erg-server]
//!   ├── domain/           ServerConfig, control requests and errors
//!   ├── application/      Router: command text → reply
//!   └── infrastructure/
//!         ├── hub         subscriber registry and fan-out
//!         ├── connection  per-connection read/write pumps
//!         ├── ws_server   accept loop (tokio-tungstenite)
//!         ├── device/     control loop, monitor loop, device manager
//!         └── service     wiring and ordered shutdown
//!         ↕
//! Performance monitor (ErgDevice driver from erg-core)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `erg-core` only; it reaches the
//!   monitor through the `DeviceControl` trait.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration and control vocabulary (no I/O).
pub mod domain;

/// Application layer: subscriber command routing.
pub mod application;

/// Infrastructure layer: hub, connections, listener and device loops.
pub mod infrastructure;
