//! Channel (remote) broker adapter
//!
//! Speaks the wire protocol over a TCP connection to a broker server. One
//! connection carries one session; if the connection drops, the server
//! rolls the session's unit of work back, and the send retry policy
//! re-attaches from scratch.

use crate::broker::{Selector, StoredMessage};
use crate::config::SecurityParams;
use crate::error::{reason, Error, Result};
use crate::helper::{BrokerLink, Session};
use crate::wire::{fault_error, read_frame, write_frame, Request, Response};
use std::net::TcpStream;
use std::time::Duration;
use tracing::debug;

/// Protocol link over a TCP connection to a broker server
pub struct ChannelLink {
    stream: TcpStream,
}

impl ChannelLink {
    fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request)?;
        read_frame(&mut self.stream)?.ok_or_else(|| Error::Connection {
            reason: reason::CONNECTION_LOST,
            detail: "broker closed the connection".to_string(),
        })
    }

    fn expect_ok(&mut self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            Response::Fault {
                op,
                queue,
                reason: code,
                detail,
            } => Err(fault_error(op, queue, code, detail)),
            other => Err(unexpected(other)),
        }
    }

    fn expect_message(&mut self, request: &Request) -> Result<Option<StoredMessage>> {
        match self.call(request)? {
            Response::Message(message) => Ok(message),
            Response::Fault {
                op,
                queue,
                reason: code,
                detail,
            } => Err(fault_error(op, queue, code, detail)),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> Error {
    Error::Wire(format!("unexpected response frame: {response:?}"))
}

impl BrokerLink for ChannelLink {
    fn attach(target: &str, security: Option<&SecurityParams>) -> Result<Self> {
        if let Some(params) = security {
            debug!(cipher = %params.cipher_spec, "transport security configured");
        }
        let stream = TcpStream::connect(target).map_err(|e| Error::Connection {
            reason: reason::CONNECTION_REFUSED,
            detail: format!("connect to {}: {}", target, e),
        })?;
        stream.set_nodelay(true)?;

        let mut link = Self { stream };
        let attach = Request::Attach {
            client: env!("CARGO_PKG_NAME").to_string(),
        };
        match link.call(&attach)? {
            Response::Attached { broker } => {
                debug!(target = %target, broker = %broker, "channel attached");
                Ok(link)
            }
            Response::Fault {
                op,
                queue,
                reason: code,
                detail,
            } => Err(fault_error(op, queue, code, detail)),
            other => Err(unexpected(other)),
        }
    }

    fn ensure_queue(&mut self, queue: &str) -> Result<()> {
        self.expect_ok(&Request::EnsureQueue {
            queue: queue.to_string(),
        })
    }

    fn put(&mut self, queue: &str, message: StoredMessage, syncpoint: bool) -> Result<()> {
        self.expect_ok(&Request::Put {
            queue: queue.to_string(),
            message,
            syncpoint,
        })
    }

    fn get(
        &mut self,
        queue: &str,
        selector: &Selector,
        syncpoint: bool,
        wait: Duration,
    ) -> Result<Option<StoredMessage>> {
        self.expect_message(&Request::Get {
            queue: queue.to_string(),
            selector: selector.clone(),
            syncpoint,
            wait_ms: wait.as_millis() as u64,
        })
    }

    fn browse(&mut self, queue: &str, first: bool) -> Result<Option<StoredMessage>> {
        self.expect_message(&Request::Browse {
            queue: queue.to_string(),
            first,
        })
    }

    fn depth(&mut self, queue: &str) -> Result<usize> {
        match self.call(&Request::Depth {
            queue: queue.to_string(),
        })? {
            Response::Depth(depth) => Ok(depth),
            Response::Fault {
                op,
                queue,
                reason: code,
                detail,
            } => Err(fault_error(op, queue, code, detail)),
            other => Err(unexpected(other)),
        }
    }

    fn commit(&mut self) -> Result<()> {
        self.expect_ok(&Request::Commit)
    }

    fn rollback(&mut self) -> Result<()> {
        self.expect_ok(&Request::Rollback)
    }

    fn detach(&mut self) -> Result<()> {
        // Best effort: a vanished peer already rolled our session back.
        let _ = self.expect_ok(&Request::Detach);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }
}

/// Transport helper backed by the channel adapter
pub type ChannelTransport = Session<ChannelLink>;
