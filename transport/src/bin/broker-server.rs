//! Standalone broker server for the channel adapter.
//!
//! Hosts one in-process broker behind the wire protocol so connectors on
//! other machines (or in tests, other processes) can attach with
//! `kind = "channel"`.

use std::sync::Arc;
use tracing::info;
use transport::{Broker, BrokerServer};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let name = std::env::var("BROKER_NAME").unwrap_or_else(|_| "qm.conduit".to_string());
    let bind = std::env::var("BROKER_BIND").unwrap_or_else(|_| "0.0.0.0:7171".to_string());

    info!(broker = %name, bind = %bind, "broker server starting");

    let broker = Broker::new(name);
    let _server = BrokerServer::start(Arc::clone(&broker), &bind)?;

    info!("broker server ready");

    // Serve until killed
    loop {
        std::thread::park();
    }
}
