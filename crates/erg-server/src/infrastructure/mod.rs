//! Infrastructure layer for erg-server.
//!
//! The infrastructure layer handles all I/O and concurrency: the broadcast
//! hub, per-connection pumps, the WebSocket listener, and the device
//! manager's control and monitor loops.
//!
//! # Responsibilities
//!
//! - Binding the listener and upgrading connections to WebSocket
//! - Owning the subscriber registry and fanning out events
//! - Serializing every device call through one control loop
//! - Polling the monitor and publishing workout events
//! - Ordered startup and shutdown
//!
//! # What does NOT belong here?
//!
//! - Command validation and reply wording (application layer)
//! - Configuration parsing (done in `main.rs`)

pub mod connection;
pub mod device;
pub mod hub;
pub mod service;
pub mod ws_server;

pub use hub::{EventSink, Hub, HubHandle, HubTask};
pub use service::Service;
pub use ws_server::run_server;
