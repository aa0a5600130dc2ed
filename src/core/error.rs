//! Error types for the tracker client.

use thiserror::Error;

/// Errors from reconciling a cached sequence against an update descriptor.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Descriptor matches none of the known shapes.
    #[error("malformed update descriptor: {0}")]
    Malformed(String),

    /// A block fetch failed; the whole reconcile fails with it.
    #[error("fetching block {start}..={end} failed: {source}")]
    Fetch {
        /// First index of the block.
        start: u64,
        /// Last index of the block.
        end: u64,
        /// Underlying failure.
        #[source]
        source: ApiError,
    },

    /// A fetched block does not match what its descriptor claimed.
    #[error("block {start}..={end} mismatch: {detail}")]
    BlockMismatch {
        /// First index of the block.
        start: u64,
        /// Last index of the block.
        end: u64,
        /// What did not match.
        detail: String,
    },

    /// The materialized sequence breaks `sequence[i].index == i`.
    #[error("index gap: expected index {expected}, found {found}")]
    IndexGap {
        /// Index the position requires.
        expected: u64,
        /// Index the record carries.
        found: u64,
    },
}

/// Errors from the HTTP side of the tracker server.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("http {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, usually the server's error text.
        body: String,
    },

    /// Response body is not the JSON we expected.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(feature = "net")]
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Request(format!("invalid body: {err}"))
        } else {
            ApiError::Request(err.to_string())
        }
    }
}

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend is full.
    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded {
        /// Bytes the write needed.
        needed: usize,
        /// Bytes left in the backend.
        available: usize,
    },

    /// Snapshot could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Stored bytes are unreadable or fail their digest.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Errors from the real-time transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint could not be derived from the base URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Connection attempt failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Protocol or I/O failure on an open socket.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Socket is already closed.
    #[error("connection closed")]
    Closed,
}

#[cfg(feature = "net")]
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

/// Errors when talking to a stopped task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The actor behind the handle has shut down.
    #[error("channel task has shut down")]
    Shutdown,
}

/// Top-level tracker client errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Reconcile error.
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// HTTP API error.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Task communication error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
