//! Tracker transport layer
//!
//! Everything between the sync logic and the network:
//!
//! - **Wire messages**: [`ServerMessage`] and [`ClientFrame`]
//! - **Reconnect state machine**: [`ConnectionMachine`] with [`Backoff`]
//! - **Channel actor**: [`RealtimeChannel`] driving a [`Connector`]
//! - **Network implementations** (`net` feature): [`WebSocketConnector`] and [`HttpApi`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          SyncController                 │
//! ├───────────────────┬─────────────────────┤
//! │  RealtimeChannel  │      HttpApi        │  ← This module
//! │  (push, backoff)  │  (pull, blocks)     │
//! ├───────────────────┴─────────────────────┤
//! │       WebSocket  /  HTTP                │
//! └─────────────────────────────────────────┘
//! ```

mod backoff;
mod channel;
mod connection;
mod message;

#[cfg(feature = "net")]
mod http;
#[cfg(feature = "net")]
mod websocket;

pub use backoff::*;
pub use channel::*;
pub use connection::*;
pub use message::*;

#[cfg(feature = "net")]
pub use http::HttpApi;
#[cfg(feature = "net")]
pub use websocket::{WebSocketConnector, websocket_url};
