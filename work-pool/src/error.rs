//! Error types for the work pool

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Work pool errors
///
/// `ShuttingDown` is a clean termination signal, not a failure: consumer
/// loops match on it to exit. `Empty` and `NotFound` are caller-decided
/// conditions, never logged as failures by the pool itself.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Pool has been shut down (terminal, never recovers)
    #[error("pool shutting down")]
    ShuttingDown,

    /// Pool is empty and the caller opted out of blocking
    #[error("pool empty")]
    Empty,

    /// No entry with the requested key
    #[error("item not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
