//! Error types for the transport layer
//!
//! Broker-protocol failures carry a numeric reason code so a connector can
//! be diagnosed without a broker-side trace. "No message available" and
//! "moved to dead letter" are *not* errors; they are ordinary
//! [`GetResult`](crate::helper::GetResult) variants.

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broker reason codes attached to typed errors
pub mod reason {
    /// Queue does not exist at the broker
    pub const UNKNOWN_QUEUE: i32 = 1001;
    /// Session is not known to the broker (stale or closed)
    pub const UNKNOWN_SESSION: i32 = 1002;
    /// Connection could not be established
    pub const CONNECTION_REFUSED: i32 = 1003;
    /// Connection dropped mid-operation
    pub const CONNECTION_LOST: i32 = 1004;
    /// Malformed or oversized protocol frame
    pub const PROTOCOL: i32 = 1005;
}

/// Transport errors
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-class failure (retryable by the put retry policy)
    #[error("connection error ({reason}): {detail}")]
    Connection {
        /// Broker reason code
        reason: i32,
        /// Human-readable detail
        detail: String,
    },

    /// Broker rejected an operation
    #[error("broker error during {op} on '{queue}' ({reason}): {detail}")]
    Broker {
        /// Operation that failed (get/put/open/...)
        op: &'static str,
        /// Queue the operation targeted
        queue: String,
        /// Broker reason code
        reason: i32,
        /// Human-readable detail
        detail: String,
    },

    /// Operation requires an established session
    #[error("not connected to a broker")]
    NotConnected,

    /// Operation requires an open queue
    #[error("no queue open")]
    NoQueueOpen,

    /// A different queue is already open on this session
    #[error("queue '{open}' already open, cannot open '{requested}'")]
    QueueBusy {
        /// Currently open queue
        open: String,
        /// Queue the caller asked for
        requested: String,
    },

    /// Identity field rejected (over-length or bad Base64)
    #[error("invalid identity field: {0}")]
    InvalidIdentity(String),

    /// Wire-protocol framing or serialization failure
    #[error("wire protocol error: {0}")]
    Wire(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the put retry policy treats this error as transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection {
            reason: reason::CONNECTION_LOST,
            detail: err.to_string(),
        }
    }
}
