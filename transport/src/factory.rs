//! Adapter selection
//!
//! Callers hold a `Box<dyn TransportHelper>` and never learn which adapter
//! is behind it; everything downstream of this function is
//! broker-agnostic.

use crate::channel::ChannelTransport;
use crate::config::{BrokerKind, TransportConfig};
use crate::direct::DirectTransport;
use crate::error::Result;
use crate::helper::{Session, TransportHelper};

/// Build a connected transport helper for the configured broker
pub fn connect_transport(config: &TransportConfig) -> Result<Box<dyn TransportHelper>> {
    let target = config.target.clone();
    match config.kind {
        BrokerKind::Direct => {
            let mut session: DirectTransport = Session::new(config.clone());
            session.connect(&target, false)?;
            Ok(Box::new(session))
        }
        BrokerKind::Channel => {
            let mut session: ChannelTransport = Session::new(config.clone());
            session.connect(&target, false)?;
            Ok(Box::new(session))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;

    #[test]
    fn test_direct_factory_connects() {
        Broker::register("qm.factory.test");
        let config = TransportConfig {
            target: "qm.factory.test".to_string(),
            ..TransportConfig::default()
        };
        let mut helper = connect_transport(&config).unwrap();
        helper.open_queue("FACTORY.IN").unwrap();
        assert_eq!(helper.queue_depth("FACTORY.IN").unwrap(), 0);
    }

    #[test]
    fn test_direct_factory_rejects_unknown_target() {
        let config = TransportConfig {
            target: "qm.factory.missing".to_string(),
            ..TransportConfig::default()
        };
        assert!(connect_transport(&config).is_err());
    }
}
