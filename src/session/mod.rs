//! Session state
//!
//! Implements:
//! - The persisted snapshot and its storage envelope
//! - Pluggable key/value storage backends
//! - Reference-counted topic subscriptions

mod snapshot;
mod storage;
mod subscriptions;

pub use snapshot::*;
pub use storage::*;
pub use subscriptions::*;
