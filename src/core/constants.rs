//! Protocol constants shared by the client and the tracker server.
//!
//! Timing values mirror what the server side expects from browser clients;
//! they are defaults, and the timing ones can be overridden via
//! [`BackoffConfig`](crate::transport::BackoffConfig).

use std::time::Duration;

// =============================================================================
// RECONNECT TIMING
// =============================================================================

/// Retry delay used before the channel has ever opened.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Retry delay floor, restored after every successful open.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Retry delay ceiling.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(20_000);

/// Interval between "reconnecting in N sec." status updates.
pub const RECONNECT_STATUS_TICK: Duration = Duration::from_secs(1);

/// How long to wait for a close handshake before dropping the socket.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay before re-polling `state` when the server answers `{"loading": true}`.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default HTTP request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// CLOSE REASONS
// =============================================================================

/// Close-reason prefix the server uses for conditions that must not be retried.
pub const FATAL_CLOSE_PREFIX: &str = "Server Error:";

/// Close-reason prefix for errors of unknown cause; retried at the ceiling.
pub const ERROR_CLOSE_PREFIX: &str = "Error:";

// =============================================================================
// ENDPOINTS
// =============================================================================

/// Full state snapshot.
pub const STATE_PATH: &str = "state";

/// Versioned event config.
pub const CONFIG_PATH: &str = "config";

/// Versioned event routes.
pub const ROUTES_PATH: &str = "routes";

/// Real-time channel.
pub const WEBSOCKET_PATH: &str = "websocket";

// =============================================================================
// MESSAGE KEYS
// =============================================================================

/// Value-map topics: `{entity: {field: value}}` merged per entity, not reconciled.
pub const VALUE_TOPICS: &[&str] = &["riders_values", "riders_pre_post_values", "riders_predicted"];

/// Default list topic (rider point histories).
pub const RIDERS_POINTS: &str = "riders_points";

/// Separator between topic and entity in a per-entity subscription.
pub const TOPIC_ENTITY_SEPARATOR: char = '.';

// =============================================================================
// STATUS / PERSISTENCE
// =============================================================================

/// Errors kept in the rolling error log.
pub const ERROR_LOG_CAPACITY: usize = 20;

/// Errors shown above the status line.
pub const ERRORS_SHOWN: usize = 4;

/// Version of the persisted snapshot envelope. Bump on incompatible changes.
pub const SNAPSHOT_FORMAT: u32 = 1;
