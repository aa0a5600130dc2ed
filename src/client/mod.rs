//! Tracker client
//!
//! High-level API: configuration, the sync controller that owns a session,
//! and the [`TrackerClient`] launcher.

#[allow(clippy::module_inception)]
mod client;
mod config;
mod controller;
mod status;

pub use client::*;
pub use config::*;
pub use controller::*;
pub use status::*;
