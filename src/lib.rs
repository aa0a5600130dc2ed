//! # Trackers Sync
//!
//! Client core for live event tracking. A server publishes per-entity
//! sequences (GPS points, splits, ...) and per-entity values; this crate
//! keeps a local copy in sync with as little transfer as possible:
//!
//! - **Reconciliation**: sequences arrive as hash-addressed blocks; blocks
//!   already cached are reused, the rest are fetched concurrently
//! - **Push and pull**: a reconnecting WebSocket while the event is live,
//!   HTTP pulls when it is not
//! - **Persistence**: the live session survives restarts via a checksummed,
//!   optionally compressed snapshot
//! - **Subscriptions**: reference-counted topics, resent on every reconnect
//!
//! ## Feature Flags
//!
//! - `net` (default): reqwest HTTP client, tokio-tungstenite WebSocket and
//!   [`TrackerClient::launch`]
//! - `compression` (default): zstd snapshot envelopes
//! - `cli` (default): the `trackers-watch` binary
//!
//! ## Modules
//!
//! - [`core`]: Traits, constants and error types
//! - [`sync`]: Records, update descriptors and reconciliation
//! - [`session`]: Snapshot, storage backends and subscriptions
//! - [`transport`]: Wire messages, backoff and the real-time channel
//! - [`client`]: Configuration, the sync controller and the launcher
//!
//! ## Example Usage
//!
//! ```rust
//! use trackers_sync::prelude::*;
//!
//! struct Printer;
//!
//! impl SyncObserver for Printer {
//!     fn on_sequence_reconciled(&self, topic: &str, entity: &str, result: &SyncResult) {
//!         println!("{topic} {entity}: {} records", result.new_list.len());
//!     }
//! }
//!
//! let update = UpdateDescriptor::from_value(serde_json::json!({
//!     "add_block": [{"hash": "u0Zw", "index": 0}]
//! }))
//! .unwrap();
//! assert!(!update.may_fetch());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module
pub mod core;

// Sequence reconciliation
pub mod sync;

// Snapshot, storage and subscriptions
pub mod session;

// Wire format and real-time channel
pub mod transport;

// Client API
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::client::{
        ClientConfig, ClientConfigBuilder, ConfigPhase, ControllerInput, MessageOrigin,
        StatusBoard, SyncController, TrackerClient,
    };
    pub use crate::session::{
        FileStorage, MemoryStorage, PersistedSnapshot, SnapshotStorage, SnapshotStore,
        SubscriptionRegistry,
    };
    pub use crate::sync::{Block, Record, SyncResult, UpdateDescriptor, reconcile};
    pub use crate::transport::{
        BackoffConfig, ChannelEvent, ChannelHandle, Connector, RealtimeChannel, ServerMessage,
    };

    #[cfg(feature = "net")]
    pub use crate::transport::{HttpApi, WebSocketConnector};
}

// Re-export commonly used items at crate root
pub use crate::core::{Api, SyncObserver, TrackerError};

pub use client::{ClientConfig, SyncController, TrackerClient};
pub use sync::{Record, SyncResult, UpdateDescriptor, reconcile};
