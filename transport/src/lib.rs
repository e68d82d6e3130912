//! Conduit Transport
//!
//! Broker-agnostic transactional messaging for connector threads:
//! - One [`TransportHelper`] contract, two adapters (in-process and
//!   remote-over-TCP) with identical observable behavior
//! - Units of work spanning gets and puts, committed or rolled back as one
//! - Identity-based selection and stamping (message, correlation, group)
//! - Ordered group retrieval with strict ascending sequences
//! - Dead-letter escalation past a redelivery threshold, backup mirroring
//! - Bounded send retries with transparent reconnect
//!
//! A helper instance belongs to exactly one thread. Build one with
//! [`connect_transport`] and a [`TransportConfig`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod broker;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod direct;
pub mod error;
pub mod factory;
pub mod helper;
pub mod identity;
pub mod metrics;
pub mod reply_options;
pub mod retry;
pub mod server;
pub mod wire;

// Re-exports
pub use broker::Broker;
pub use config::{BrokerKind, SecurityParams, TransportConfig};
pub use descriptor::{DeliveryInfo, GroupHeader, MessageKind, PayloadFormat};
pub use error::{Error, Result};
pub use factory::connect_transport;
pub use helper::{GetResult, TransportHelper};
pub use identity::{CorrelId, GroupId, MsgId};
pub use reply_options::{ReplyFlag, ReplyOptions};
pub use retry::RetryPolicy;
pub use server::BrokerServer;
