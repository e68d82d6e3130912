//! Conduit Work Pool
//!
//! Bounded hand-off queue between watcher and worker threads with:
//! - Shared-ownership work item handles (freed exactly once)
//! - Per-producer backpressure (reservation ceilings, default 10)
//! - Keyed out-of-order removal alongside plain FIFO removal
//! - One-shot broadcast shutdown that wakes every blocked caller
//! - Observability via Prometheus metrics
//!
//! # Invariants
//!
//! - `outstanding[owner] <= reservation[owner]` except transiently while a
//!   woken adder finishes its counter update
//! - FIFO order holds for plain removal within one producer thread
//! - Shutdown is terminal: no blocking call ever blocks again afterwards

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod pool;

// Re-exports
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use handle::WorkItem;
pub use pool::BoundedWorkPool;
