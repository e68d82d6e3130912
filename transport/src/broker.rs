//! In-process broker engine
//!
//! The queue-manager state machine both adapters are exercised against:
//! named queues of stored messages, per-session units of work, selector
//! matching, blocking gets with a bounded wait, browse and depth. It honors
//! the reliable / ordered / at-least-once contract; no real broker's wire
//! format is reproduced.
//!
//! Unit-of-work semantics:
//! - a syncpoint get removes the message from its queue and parks it on the
//!   session; commit discards it for good, rollback puts it back at the
//!   head with its delivery count bumped
//! - a syncpoint put is parked on the session and only becomes visible on
//!   commit
//! - closing a session rolls back whatever is still pending

use crate::descriptor::{GroupHeader, MessageKind, PayloadFormat};
use crate::error::{reason, Error, Result};
use crate::identity::{CorrelId, GroupId, MsgId};
use crate::reply_options::ReplyOptions;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A message as the broker stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Message identity
    pub msg_id: MsgId,
    /// Correlation identity
    pub correl_id: Option<CorrelId>,
    /// Group membership
    pub group: Option<GroupHeader>,
    /// Wire role
    pub kind: MessageKind,
    /// Feedback code (replies/reports)
    pub feedback: i32,
    /// Reply routing
    pub reply_to_queue: Option<String>,
    /// Reply routing (broker identity)
    pub reply_to_broker: Option<String>,
    /// Requested delivery confirmations
    pub reply_options: ReplyOptions,
    /// Putting application
    pub app_name: String,
    /// Broker-side put timestamp
    pub put_time: DateTime<Utc>,
    /// Body format tag
    pub format: PayloadFormat,
    /// Times delivered and rolled back
    pub delivery_count: u32,
    /// Message body
    pub payload: Vec<u8>,
}

/// Retrieval selection criteria; unset fields match anything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    /// Match a specific message id
    pub msg_id: Option<MsgId>,
    /// Match a specific correlation id
    pub correl_id: Option<CorrelId>,
    /// Match members of a specific group
    pub group_id: Option<GroupId>,
    /// Match a specific position within the group
    pub group_seq: Option<u32>,
}

impl Selector {
    /// Whether a stored message satisfies every set criterion
    pub fn matches(&self, msg: &StoredMessage) -> bool {
        if let Some(want) = &self.msg_id {
            if *want != msg.msg_id {
                return false;
            }
        }
        if let Some(want) = &self.correl_id {
            if msg.correl_id.as_ref() != Some(want) {
                return false;
            }
        }
        if let Some(want) = &self.group_id {
            match &msg.group {
                Some(group) if group.id == *want => {}
                _ => return false,
            }
        }
        if let Some(want) = self.group_seq {
            match &msg.group {
                Some(group) if group.sequence == want => {}
                _ => return false,
            }
        }
        true
    }

    /// Whether any criterion is set
    pub fn is_selective(&self) -> bool {
        self.msg_id.is_some()
            || self.correl_id.is_some()
            || self.group_id.is_some()
            || self.group_seq.is_some()
    }
}

/// Per-session unit-of-work state
#[derive(Default)]
struct SessionState {
    /// Messages retrieved under syncpoint, not yet committed
    pending_gets: Vec<(String, StoredMessage)>,
    /// Messages put under syncpoint, not yet committed
    pending_puts: Vec<(String, StoredMessage)>,
    /// Browse cursors, one per queue
    browse_pos: HashMap<String, usize>,
}

struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    sessions: HashMap<u64, SessionState>,
    next_session: u64,
}

/// An in-process broker instance.
///
/// Shared between sessions via `Arc`; the direct adapter attaches to it
/// in-process, the broker server exposes it over the wire protocol.
pub struct Broker {
    name: String,
    state: Mutex<BrokerState>,
    /// Signals committed or non-syncpoint arrivals (paired with `state`)
    arrivals: Condvar,
}

lazy_static! {
    /// Named in-process brokers reachable by the direct adapter
    static ref REGISTRY: Mutex<HashMap<String, Arc<Broker>>> = Mutex::new(HashMap::new());
}

impl Broker {
    /// Create an unregistered broker instance
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(BrokerState {
                queues: HashMap::new(),
                sessions: HashMap::new(),
                next_session: 1,
            }),
            arrivals: Condvar::new(),
        })
    }

    /// Create (or fetch) a broker reachable by name from the direct adapter
    pub fn register(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let mut registry = REGISTRY.lock();
        Arc::clone(
            registry
                .entry(name.clone())
                .or_insert_with(|| Broker::new(name)),
        )
    }

    /// Look up a registered broker by name
    pub fn lookup(name: &str) -> Option<Arc<Self>> {
        REGISTRY.lock().get(name).cloned()
    }

    /// Broker identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a session; every unit of work belongs to exactly one session
    pub fn open_session(&self) -> u64 {
        let mut state = self.state.lock();
        let sid = state.next_session;
        state.next_session += 1;
        state.sessions.insert(sid, SessionState::default());
        debug!(broker = %self.name, session = sid, "session opened");
        sid
    }

    /// Close a session, rolling back any pending unit of work
    pub fn close_session(&self, sid: u64) {
        let _ = self.rollback(sid);
        let mut state = self.state.lock();
        state.sessions.remove(&sid);
        debug!(broker = %self.name, session = sid, "session closed");
    }

    /// Create the queue if it does not exist
    pub fn ensure_queue(&self, queue: &str) {
        let mut state = self.state.lock();
        state.queues.entry(queue.to_string()).or_default();
    }

    /// Send one message to a queue
    pub fn put(
        &self,
        sid: u64,
        queue: &str,
        message: StoredMessage,
        syncpoint: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(unknown_queue("put", queue));
        }
        if syncpoint {
            let session = state
                .sessions
                .get_mut(&sid)
                .ok_or_else(|| unknown_session("put", queue))?;
            session.pending_puts.push((queue.to_string(), message));
        } else {
            if let Some(q) = state.queues.get_mut(queue) {
                q.push_back(message);
            }
            self.arrivals.notify_all();
        }
        Ok(())
    }

    /// Retrieve one message matching `selector`, waiting up to `wait` for
    /// one to arrive. Returns `None` when the wait elapses with no match.
    pub fn get(
        &self,
        sid: u64,
        queue: &str,
        selector: &Selector,
        syncpoint: bool,
        wait: Duration,
    ) -> Result<Option<StoredMessage>> {
        let deadline = Instant::now() + wait;
        let mut state = self.state.lock();

        loop {
            let pos = match state.queues.get(queue) {
                None => return Err(unknown_queue("get", queue)),
                Some(q) => q.iter().position(|m| selector.matches(m)),
            };

            if let Some(pos) = pos {
                let message = state
                    .queues
                    .get_mut(queue)
                    .and_then(|q| q.remove(pos));
                if let Some(message) = message {
                    if syncpoint {
                        let session = state
                            .sessions
                            .get_mut(&sid)
                            .ok_or_else(|| unknown_session("get", queue))?;
                        session
                            .pending_gets
                            .push((queue.to_string(), message.clone()));
                    }
                    return Ok(Some(message));
                }
                continue;
            }

            if wait.is_zero() || self.arrivals.wait_until(&mut state, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    /// Non-destructively inspect a queue.
    ///
    /// `first` rewinds the session's browse cursor to the head; otherwise
    /// the cursor advances one message per call.
    pub fn browse(&self, sid: u64, queue: &str, first: bool) -> Result<Option<StoredMessage>> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(unknown_queue("browse", queue));
        }

        let pos = {
            let session = state
                .sessions
                .get_mut(&sid)
                .ok_or_else(|| unknown_session("browse", queue))?;
            let cursor = session.browse_pos.entry(queue.to_string()).or_insert(0);
            if first {
                *cursor = 0;
            }
            let pos = *cursor;
            *cursor += 1;
            pos
        };

        Ok(state
            .queues
            .get(queue)
            .and_then(|q| q.get(pos))
            .cloned())
    }

    /// Best-effort count of visible messages on a queue
    pub fn depth(&self, queue: &str) -> Result<usize> {
        let state = self.state.lock();
        state
            .queues
            .get(queue)
            .map(|q| q.len())
            .ok_or_else(|| unknown_queue("depth", queue))
    }

    /// Make the session's pending puts visible and finalize its pending
    /// gets
    pub fn commit(&self, sid: u64) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&sid)
            .ok_or_else(|| unknown_session("commit", ""))?;

        let puts = std::mem::take(&mut session.pending_puts);
        session.pending_gets.clear();

        for (queue, message) in puts {
            state.queues.entry(queue).or_default().push_back(message);
        }
        self.arrivals.notify_all();
        Ok(())
    }

    /// Undo the session's unit of work: discard pending puts, return
    /// pending gets to their queues for redelivery with the delivery count
    /// bumped
    pub fn rollback(&self, sid: u64) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&sid)
            .ok_or_else(|| unknown_session("rollback", ""))?;

        session.pending_puts.clear();
        let gets = std::mem::take(&mut session.pending_gets);

        // Reverse order keeps the original head-of-queue ordering
        for (queue, mut message) in gets.into_iter().rev() {
            message.delivery_count += 1;
            state.queues.entry(queue).or_default().push_front(message);
        }
        self.arrivals.notify_all();
        Ok(())
    }
}

fn unknown_queue(op: &'static str, queue: &str) -> Error {
    Error::Broker {
        op,
        queue: queue.to_string(),
        reason: reason::UNKNOWN_QUEUE,
        detail: "queue does not exist".to_string(),
    }
}

fn unknown_session(op: &'static str, queue: &str) -> Error {
    Error::Broker {
        op,
        queue: queue.to_string(),
        reason: reason::UNKNOWN_SESSION,
        detail: "session not known to broker".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(payload: &[u8]) -> StoredMessage {
        StoredMessage {
            msg_id: MsgId::generate(),
            correl_id: None,
            group: None,
            kind: MessageKind::Datagram,
            feedback: 0,
            reply_to_queue: None,
            reply_to_broker: None,
            reply_options: ReplyOptions::new(),
            app_name: "test".to_string(),
            put_time: Utc::now(),
            format: PayloadFormat::Bytes,
            delivery_count: 0,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_put_get_outside_syncpoint() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let sid = broker.open_session();

        broker.put(sid, "IN", datagram(b"hello"), false).unwrap();
        let msg = broker
            .get(sid, "IN", &Selector::default(), false, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"hello");
        assert_eq!(broker.depth("IN").unwrap(), 0);
    }

    #[test]
    fn test_syncpoint_put_invisible_until_commit() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let producer = broker.open_session();
        let consumer = broker.open_session();

        broker.put(producer, "IN", datagram(b"uow"), true).unwrap();
        assert_eq!(broker.depth("IN").unwrap(), 0);
        assert!(broker
            .get(consumer, "IN", &Selector::default(), false, Duration::ZERO)
            .unwrap()
            .is_none());

        broker.commit(producer).unwrap();
        assert_eq!(broker.depth("IN").unwrap(), 1);
    }

    #[test]
    fn test_rollback_returns_message_with_bumped_count() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let sid = broker.open_session();

        broker.put(sid, "IN", datagram(b"retry-me"), false).unwrap();

        let msg = broker
            .get(sid, "IN", &Selector::default(), true, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(msg.delivery_count, 0);
        assert_eq!(broker.depth("IN").unwrap(), 0);

        broker.rollback(sid).unwrap();
        let msg = broker
            .get(sid, "IN", &Selector::default(), true, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(msg.delivery_count, 1);
    }

    #[test]
    fn test_selector_by_correl_id() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let sid = broker.open_session();

        let correl = CorrelId::from_bytes(b"req-42".to_vec()).unwrap();
        let mut wanted = datagram(b"the-reply");
        wanted.correl_id = Some(correl.clone());

        broker.put(sid, "IN", datagram(b"noise"), false).unwrap();
        broker.put(sid, "IN", wanted, false).unwrap();

        let selector = Selector {
            correl_id: Some(correl),
            ..Selector::default()
        };
        let msg = broker
            .get(sid, "IN", &selector, false, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"the-reply");
        assert_eq!(broker.depth("IN").unwrap(), 1);
    }

    #[test]
    fn test_browse_does_not_consume() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let sid = broker.open_session();

        broker.put(sid, "IN", datagram(b"one"), false).unwrap();
        broker.put(sid, "IN", datagram(b"two"), false).unwrap();

        assert_eq!(broker.browse(sid, "IN", true).unwrap().unwrap().payload, b"one");
        assert_eq!(broker.browse(sid, "IN", false).unwrap().unwrap().payload, b"two");
        assert!(broker.browse(sid, "IN", false).unwrap().is_none());
        assert_eq!(broker.browse(sid, "IN", true).unwrap().unwrap().payload, b"one");
        assert_eq!(broker.depth("IN").unwrap(), 2);
    }

    #[test]
    fn test_get_unknown_queue_carries_reason() {
        let broker = Broker::new("qm.test");
        let sid = broker.open_session();
        let err = broker
            .get(sid, "NOPE", &Selector::default(), false, Duration::ZERO)
            .unwrap_err();
        match err {
            Error::Broker { reason: code, .. } => assert_eq!(code, reason::UNKNOWN_QUEUE),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_close_session_rolls_back() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let sid = broker.open_session();

        broker.put(sid, "IN", datagram(b"inflight"), false).unwrap();
        broker
            .get(sid, "IN", &Selector::default(), true, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(broker.depth("IN").unwrap(), 0);

        broker.close_session(sid);
        assert_eq!(broker.depth("IN").unwrap(), 1);
    }

    #[test]
    fn test_blocking_get_sees_concurrent_arrival() {
        let broker = Broker::new("qm.test");
        broker.ensure_queue("IN");
        let consumer = broker.open_session();

        let waiter = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                broker.get(
                    consumer,
                    "IN",
                    &Selector::default(),
                    false,
                    Duration::from_secs(5),
                )
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        let producer = broker.open_session();
        broker.put(producer, "IN", datagram(b"late"), false).unwrap();

        let msg = waiter.join().unwrap().unwrap().unwrap();
        assert_eq!(msg.payload, b"late");
    }
}
