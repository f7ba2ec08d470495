//! Application layer for erg-server.
//!
//! The application layer knows *what* to do with a subscriber command, and
//! delegates *how* to reach the monitor to the infrastructure layer through
//! the [`DeviceControl`] trait.
//!
//! # What does NOT belong here?
//!
//! - Sockets, queues or task spawning (infrastructure)
//! - Talking to the monitor directly (the control loop owns it)

pub mod router;

pub use router::{DeviceControl, Router, INVALID_FORMAT};
