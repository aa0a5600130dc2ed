//! Core traits for the tracker client.
//!
//! These are the seams between the protocol core and the outside world:
//! block fetching, the HTTP API, and the rendering layer.

use async_trait::async_trait;
use serde_json::Value;

use super::error::ApiError;
use crate::sync::{Block, Record, SyncResult};
use crate::transport::ServerMessage;

/// Capability to fetch the authoritative records of one block.
///
/// Implementations must return exactly the records `start_index..=end_index`
/// of the sequence the block was cut from.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Fetch the records covered by `block`.
    async fn fetch_block(&self, block: &Block) -> Result<Vec<Record>, ApiError>;
}

/// The tracker server's HTTP API, rooted at one event's base URL.
#[async_trait]
pub trait Api: Send + Sync {
    /// `GET <base>/state`.
    async fn state(&self) -> Result<ServerMessage, ApiError>;

    /// `GET <base>/config?hash=<hash>`.
    async fn config(&self, hash: &str) -> Result<Value, ApiError>;

    /// `GET <base>/routes?hash=<hash>`.
    async fn routes(&self, hash: &str) -> Result<Value, ApiError>;

    /// `GET <base>/<topic>?name=<entity>&start_index=..&end_index=..&end_hash=..`.
    async fn block(&self, topic: &str, entity: &str, block: &Block) -> Result<Vec<Record>, ApiError>;

    /// `GET <base>/<topic>[?name=<entity>]`.
    ///
    /// Without an entity the server answers `{entity: descriptor}`; with one
    /// it answers a single descriptor.
    async fn pull(&self, topic: &str, entity: Option<&str>) -> Result<Value, ApiError>;
}

/// Receiver of reconciled data and status, typically a rendering layer.
///
/// All methods default to no-ops so implementors pick what they draw.
pub trait SyncObserver: Send + Sync {
    /// Event config was replaced; derived visual state must be rebuilt.
    fn on_config_replaced(&self, config: &Value) {
        let _ = config;
    }

    /// Routes were replaced.
    fn on_routes_replaced(&self, routes: &Value) {
        let _ = routes;
    }

    /// A sequence changed. Consumers discard `old_items` and apply `new_items`.
    fn on_sequence_reconciled(&self, topic: &str, entity: &str, result: &SyncResult) {
        let _ = (topic, entity, result);
    }

    /// Merged current values for one entity.
    fn on_values(&self, topic: &str, entity: &str, values: &Value) {
        let _ = (topic, entity, values);
    }

    /// Human-readable connection status, including recent errors.
    fn on_connection_status(&self, text: &str) {
        let _ = text;
    }

    /// An error was appended to the rolling error log.
    fn on_error(&self, error: &str) {
        let _ = error;
    }

    /// Server reports a different client build; local state was discarded.
    fn on_client_stale(&self, server_hash: &str) {
        let _ = server_hash;
    }
}

impl SyncObserver for () {}
