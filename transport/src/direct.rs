//! Direct (in-process) broker adapter
//!
//! Attaches to a broker registered in this process by name. Connector and
//! broker share an address space; there is no wire protocol and no
//! connection to lose, so retries never fire here in practice.

use crate::broker::{Broker, Selector, StoredMessage};
use crate::config::SecurityParams;
use crate::error::{reason, Error, Result};
use crate::helper::{BrokerLink, Session};
use std::sync::Arc;
use std::time::Duration;

/// Protocol link bound to an in-process broker session
pub struct DirectLink {
    broker: Arc<Broker>,
    session: u64,
}

impl BrokerLink for DirectLink {
    fn attach(target: &str, _security: Option<&SecurityParams>) -> Result<Self> {
        let broker = Broker::lookup(target).ok_or_else(|| Error::Connection {
            reason: reason::CONNECTION_REFUSED,
            detail: format!("no in-process broker named '{}'", target),
        })?;
        let session = broker.open_session();
        Ok(Self { broker, session })
    }

    fn ensure_queue(&mut self, queue: &str) -> Result<()> {
        self.broker.ensure_queue(queue);
        Ok(())
    }

    fn put(&mut self, queue: &str, message: StoredMessage, syncpoint: bool) -> Result<()> {
        self.broker.put(self.session, queue, message, syncpoint)
    }

    fn get(
        &mut self,
        queue: &str,
        selector: &Selector,
        syncpoint: bool,
        wait: Duration,
    ) -> Result<Option<StoredMessage>> {
        self.broker.get(self.session, queue, selector, syncpoint, wait)
    }

    fn browse(&mut self, queue: &str, first: bool) -> Result<Option<StoredMessage>> {
        self.broker.browse(self.session, queue, first)
    }

    fn depth(&mut self, queue: &str) -> Result<usize> {
        self.broker.depth(queue)
    }

    fn commit(&mut self) -> Result<()> {
        self.broker.commit(self.session)
    }

    fn rollback(&mut self) -> Result<()> {
        self.broker.rollback(self.session)
    }

    fn detach(&mut self) -> Result<()> {
        self.broker.close_session(self.session);
        Ok(())
    }
}

impl Drop for DirectLink {
    fn drop(&mut self) {
        // Close is idempotent; a dropped link must not strand its unit of
        // work.
        self.broker.close_session(self.session);
    }
}

/// Transport helper backed by the direct adapter
pub type DirectTransport = Session<DirectLink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_requires_registered_broker() {
        match DirectLink::attach("qm.nowhere", None) {
            Err(Error::Connection { reason: code, .. }) => {
                assert_eq!(code, reason::CONNECTION_REFUSED)
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("attach to unregistered broker succeeded"),
        }
    }

    #[test]
    fn test_attach_and_round_trip() {
        Broker::register("qm.direct.test");
        let mut link = DirectLink::attach("qm.direct.test", None).unwrap();
        link.ensure_queue("IN").unwrap();
        assert_eq!(link.depth("IN").unwrap(), 0);
    }
}
