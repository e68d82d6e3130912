//! Wire protocol for the channel adapter
//!
//! One request, one response, in order, per connection. Frames are
//! bincode-encoded and length-prefixed with a big-endian `u32`; a frame
//! longer than [`MAX_FRAME_LEN`] is a protocol violation and the reader
//! rejects it before allocating.

use crate::broker::{Selector, StoredMessage};
use crate::error::{reason, Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Upper bound on a single frame, prefix excluded
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Client-to-server protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Open a session
    Attach {
        /// Application name, for broker-side logs
        client: String,
    },
    /// Create the queue if the broker does not know it yet
    EnsureQueue {
        /// Queue name
        queue: String,
    },
    /// Send one message
    Put {
        /// Destination queue
        queue: String,
        /// The message
        message: StoredMessage,
        /// Park in the unit of work instead of delivering immediately
        syncpoint: bool,
    },
    /// Retrieve one matching message
    Get {
        /// Source queue
        queue: String,
        /// Selection criteria
        selector: Selector,
        /// Park in the unit of work
        syncpoint: bool,
        /// How long the broker may block waiting for a match
        wait_ms: u64,
    },
    /// Browse without consuming
    Browse {
        /// Queue to inspect
        queue: String,
        /// Rewind the browse cursor first
        first: bool,
    },
    /// Count visible messages
    Depth {
        /// Queue to count
        queue: String,
    },
    /// Commit the session's unit of work
    Commit,
    /// Roll the session's unit of work back
    Rollback,
    /// Close the session
    Detach,
}

/// Server-to-client protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Session opened
    Attached {
        /// Broker identity, for logs
        broker: String,
    },
    /// Operation succeeded with nothing to return
    Ok,
    /// Get/browse result; `None` means no match within the wait
    Message(Option<StoredMessage>),
    /// Depth result
    Depth(usize),
    /// Operation failed at the broker
    Fault {
        /// Operation that failed
        op: String,
        /// Queue the operation targeted
        queue: String,
        /// Broker reason code
        reason: i32,
        /// Human-readable detail
        detail: String,
    },
}

impl Response {
    /// Build a fault response from a broker-side error
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Broker {
                op,
                queue,
                reason: code,
                detail,
            } => Response::Fault {
                op: (*op).to_string(),
                queue: queue.clone(),
                reason: *code,
                detail: detail.clone(),
            },
            other => Response::Fault {
                op: "unknown".to_string(),
                queue: String::new(),
                reason: reason::PROTOCOL,
                detail: other.to_string(),
            },
        }
    }

}

/// Reconstruct the typed error a fault response carries
pub fn fault_error(op: String, queue: String, code: i32, detail: String) -> Error {
    Error::Broker {
        op: op_label(&op),
        queue,
        reason: code,
        detail,
    }
}

fn op_label(op: &str) -> &'static str {
    match op {
        "put" => "put",
        "get" => "get",
        "browse" => "browse",
        "depth" => "depth",
        "commit" => "commit",
        "rollback" => "rollback",
        _ => "remote",
    }
}

/// Write one length-prefixed frame
pub fn write_frame<T: Serialize>(writer: &mut impl Write, frame: &T) -> Result<()> {
    let body = bincode::serialize(frame).map_err(|e| Error::Wire(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Wire(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF at a
/// frame boundary; an EOF partway into the prefix is a lost connection,
/// same as a truncated body.
pub fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> Result<Option<T>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Wire(format!(
            "peer announced frame of {} bytes, limit is {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    let frame = bincode::deserialize(&body).map_err(|e| Error::Wire(e.to_string()))?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip_request() {
        let mut buf = Vec::new();
        let frame = Request::Get {
            queue: "ORDERS".to_string(),
            selector: Selector::default(),
            syncpoint: true,
            wait_ms: 500,
        };
        write_frame(&mut buf, &frame).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_frame(&mut cursor).unwrap().unwrap();
        match decoded {
            Request::Get { queue, wait_ms, .. } => {
                assert_eq!(queue, "ORDERS");
                assert_eq!(wait_ms, 500);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_clean_eof_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        let decoded: Option<Request> = read_frame(&mut cursor).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result: Result<Option<Request>> = read_frame(&mut cursor);
        assert!(matches!(result, Err(Error::Wire(_))));
    }

    #[test]
    fn test_truncated_prefix_is_connection_error() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0]);
        let result: Result<Option<Request>> = read_frame(&mut cursor);
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[test]
    fn test_truncated_body_is_connection_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(buf);
        let result: Result<Option<Request>> = read_frame(&mut cursor);
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
