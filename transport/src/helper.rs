//! Broker-agnostic transactional messaging contract
//!
//! [`TransportHelper`] is the contract every broker adapter implements; one
//! instance belongs to exactly one worker thread (methods take `&mut self`,
//! instances are never shared). [`Session`] carries the contract semantics
//! once: open-queue reference counting, pending identity fields, group
//! cursors, dead-letter escalation, backup mirroring, and bounded retry all
//! live here, on top of a [`BrokerLink`], which is the only part the two
//! adapters implement differently.
//!
//! State machine: `Disconnected → Connected → QueueOpen → {Connected}`.

use crate::broker::{Selector, StoredMessage};
use crate::config::{SecurityParams, TransportConfig};
use crate::descriptor::{
    DeliveryInfo, GroupHeader, MessageKind, PayloadFormat, FEEDBACK_NONE,
};
use crate::error::{Error, Result};
use crate::identity::{CorrelId, GroupId, MsgId};
use crate::metrics::{
    TRANSPORT_DEAD_LETTER_TOTAL, TRANSPORT_GET_TOTAL, TRANSPORT_PUT_TOTAL, TRANSPORT_UOW_TOTAL,
};
use crate::reply_options::ReplyOptions;
use bytes::BytesMut;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a retrieval attempt. `NoMatch` and `DeadLettered` are
/// ordinary outcomes the caller branches on, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResult {
    /// A message was delivered into the caller's buffer
    Delivered,
    /// No matching message arrived within the wait interval
    NoMatch,
    /// The matching message hit the auto-abandon threshold and was moved
    /// to the backout queue inside the same unit of work
    DeadLettered,
}

/// The transactional messaging contract, implemented by each broker
/// adapter with identical externally observable behavior.
pub trait TransportHelper {
    /// Establish a session. Idempotent for the same target unless `force`;
    /// a differing target (or `force`) tears the existing session down
    /// first. An empty `target` reuses the previous one.
    fn connect(&mut self, target: &str, force: bool) -> Result<()>;

    /// Tear the session down, implicitly closing any open queue
    fn disconnect(&mut self) -> Result<()>;

    /// Bind the session to a destination queue. Reference-counted: nested
    /// opens of the same queue stack, and only the outermost
    /// [`close_queue`](TransportHelper::close_queue) releases the binding.
    fn open_queue(&mut self, name: &str) -> Result<()>;

    /// Release one open-queue reference
    fn close_queue(&mut self) -> Result<()>;

    /// Retrieve one message matching the pending selection criteria,
    /// waiting up to the configured interval
    fn get_one(&mut self, buf: &mut BytesMut, syncpoint: bool) -> Result<GetResult>;

    /// Retrieve the next member of an ordered group, in strict ascending
    /// sequence order
    fn get_group_message(&mut self, group: &GroupId, buf: &mut BytesMut) -> Result<GetResult>;

    /// Send one message to the open queue, stamped with any pending
    /// identity fields (each consumed by one send)
    fn put_one(&mut self, payload: &[u8], syncpoint: bool) -> Result<()>;

    /// Send one member of an ordered group
    fn put_group_message(
        &mut self,
        payload: &[u8],
        group: &GroupId,
        sequence: u32,
        last: bool,
    ) -> Result<()>;

    /// Send a request carrying reply routing and requested delivery
    /// confirmations
    fn put_request(
        &mut self,
        payload: &[u8],
        reply_to_queue: &str,
        reply_to_broker: &str,
        options: &ReplyOptions,
    ) -> Result<()>;

    /// Send a reply carrying a feedback code, correlated via the pending
    /// correlation id
    fn put_reply(&mut self, payload: &[u8], feedback: i32) -> Result<()>;

    /// Make the unit of work durable
    fn commit(&mut self) -> Result<()>;

    /// Undo the unit of work; retrieved messages become redeliverable
    fn rollback(&mut self) -> Result<()>;

    /// Non-destructively inspect a queue (existence checks)
    fn peek(&mut self, queue: &str, first: bool) -> Result<GetResult>;

    /// Best-effort count of messages on a queue
    fn queue_depth(&mut self, queue: &str) -> Result<usize>;

    /// Select or stamp a specific message id (consumed by one get or put)
    fn set_msg_id(&mut self, id: MsgId);

    /// Select or stamp a specific correlation id (consumed by one get or
    /// put)
    fn set_correl_id(&mut self, id: CorrelId);

    /// Select or stamp a specific group id (consumed by one get or put)
    fn set_group_id(&mut self, id: GroupId);

    /// Application name stamped on the next send (consumed by one send)
    fn set_application_name(&mut self, name: &str);

    /// Body format tag stamped on subsequent sends (sticky)
    fn set_format(&mut self, format: PayloadFormat);

    /// Redelivery-count threshold for dead-letter escalation; `0` disables
    fn set_auto_abandon(&mut self, threshold: u32);

    /// Mirror every successful retrieval to this queue within the same
    /// unit of work; empty name disables
    fn set_backup_queue(&mut self, queue: &str);

    /// Metadata captured from the most recent retrieval
    fn last_delivery(&self) -> Option<&DeliveryInfo>;
}

/// Protocol seam between the shared session semantics and a concrete
/// broker protocol. The direct adapter attaches in-process; the channel
/// adapter speaks the wire protocol over TCP.
pub trait BrokerLink: Sized {
    /// Establish the protocol-level session
    fn attach(target: &str, security: Option<&SecurityParams>) -> Result<Self>;

    /// Create the queue if the broker does not know it yet
    fn ensure_queue(&mut self, queue: &str) -> Result<()>;

    /// Send one message
    fn put(&mut self, queue: &str, message: StoredMessage, syncpoint: bool) -> Result<()>;

    /// Retrieve one message matching `selector`, waiting up to `wait`
    fn get(
        &mut self,
        queue: &str,
        selector: &Selector,
        syncpoint: bool,
        wait: Duration,
    ) -> Result<Option<StoredMessage>>;

    /// Browse without consuming
    fn browse(&mut self, queue: &str, first: bool) -> Result<Option<StoredMessage>>;

    /// Visible message count
    fn depth(&mut self, queue: &str) -> Result<usize>;

    /// Commit the unit of work
    fn commit(&mut self) -> Result<()>;

    /// Roll the unit of work back
    fn rollback(&mut self) -> Result<()>;

    /// Tear the protocol-level session down
    fn detach(&mut self) -> Result<()>;
}

/// Identity fields armed by the setters, consumed by one get or one put
#[derive(Debug, Default, Clone)]
struct PendingIdentity {
    msg_id: Option<MsgId>,
    correl_id: Option<CorrelId>,
    group_id: Option<GroupId>,
    app_name: Option<String>,
}

impl PendingIdentity {
    fn clear(&mut self) {
        *self = PendingIdentity::default();
    }
}

/// Shared session engine behind both adapters.
///
/// Generic over the protocol link; everything observable through
/// [`TransportHelper`] lives here so the two adapters cannot drift apart.
pub struct Session<L: BrokerLink> {
    config: TransportConfig,
    link: Option<L>,
    target: Option<String>,
    open_queue: Option<String>,
    open_count: u32,
    pending: PendingIdentity,
    format: PayloadFormat,
    auto_abandon: u32,
    backup_queue: Option<String>,
    /// Next expected sequence per in-progress group
    group_cursors: HashMap<GroupId, u32>,
    /// Cursor snapshot as of the last commit, restored on rollback
    committed_cursors: HashMap<GroupId, u32>,
    last_delivery: Option<DeliveryInfo>,
}

impl<L: BrokerLink> Session<L> {
    /// Create a disconnected session from configuration
    pub fn new(config: TransportConfig) -> Self {
        let auto_abandon = config.auto_abandon;
        let backup_queue = config.backup_queue.clone().filter(|q| !q.is_empty());
        Self {
            config,
            link: None,
            target: None,
            open_queue: None,
            open_count: 0,
            pending: PendingIdentity::default(),
            format: PayloadFormat::Bytes,
            auto_abandon,
            backup_queue,
            group_cursors: HashMap::new(),
            committed_cursors: HashMap::new(),
            last_delivery: None,
        }
    }

    fn link(&mut self) -> Result<&mut L> {
        self.link.as_mut().ok_or(Error::NotConnected)
    }

    fn require_open(&self) -> Result<String> {
        self.open_queue.clone().ok_or(Error::NoQueueOpen)
    }

    /// Re-establish the link after a connection-class failure, restoring
    /// the open-queue binding
    fn reconnect(&mut self, queue: &str) -> Result<()> {
        let target = self.target.clone().ok_or(Error::NotConnected)?;
        info!(target = %target, queue = %queue, "reconnecting after transient failure");
        if let Some(mut link) = self.link.take() {
            let _ = link.detach();
        }
        let mut link = L::attach(&target, self.config.security.as_ref())?;
        link.ensure_queue(queue)?;
        self.link = Some(link);
        Ok(())
    }

    /// Build an outgoing message from the pending identity fields.
    ///
    /// Does not consume them; the caller clears them once the send path
    /// finishes (successfully or not).
    fn build_message(
        &self,
        payload: &[u8],
        kind: MessageKind,
        feedback: i32,
        group: Option<GroupHeader>,
        reply_to_queue: Option<String>,
        reply_to_broker: Option<String>,
        reply_options: ReplyOptions,
    ) -> StoredMessage {
        let group = group.or_else(|| {
            // A pending group id on a plain send stamps membership without
            // ordering; ordered groups go through put_group_message.
            self.pending.group_id.clone().map(|id| GroupHeader {
                id,
                sequence: 1,
                last: false,
            })
        });
        StoredMessage {
            msg_id: self.pending.msg_id.clone().unwrap_or_else(MsgId::generate),
            correl_id: self.pending.correl_id.clone(),
            group,
            kind,
            feedback,
            reply_to_queue,
            reply_to_broker,
            reply_options,
            app_name: self
                .pending
                .app_name
                .clone()
                .unwrap_or_else(|| self.config.application_name.clone()),
            put_time: Utc::now(),
            format: self.format,
            delivery_count: 0,
            payload: payload.to_vec(),
        }
    }

    /// Common send path: bounded retry with reconnect + reopen between
    /// attempts, pending identity cleared whatever the outcome
    fn send(&mut self, message: StoredMessage, syncpoint: bool, kind_label: &str) -> Result<()> {
        let queue = self.require_open()?;
        let policy = self.config.retry.clone();

        let result = policy.run(|attempt| {
            if attempt > 1 {
                self.reconnect(&queue)?;
            }
            self.link()?.put(&queue, message.clone(), syncpoint)
        });

        // A send that ultimately fails must not leak stale identity into
        // an unrelated later send.
        self.pending.clear();

        let status = if result.is_ok() { "success" } else { "error" };
        TRANSPORT_PUT_TOTAL
            .with_label_values(&[kind_label, status])
            .inc();
        result
    }

    /// Common receive tail: dead-letter escalation, buffer fill, backup
    /// mirroring, metadata capture, selector consumption
    fn accept_delivery(
        &mut self,
        message: StoredMessage,
        buf: &mut BytesMut,
        syncpoint: bool,
    ) -> Result<GetResult> {
        // Selection criteria are consumed by a completed retrieval
        self.pending.msg_id = None;
        self.pending.correl_id = None;
        self.pending.group_id = None;

        if self.auto_abandon > 0 && message.delivery_count >= self.auto_abandon {
            let backout = self.config.backout_queue.clone();
            warn!(
                queue = %backout,
                delivery_count = message.delivery_count,
                threshold = self.auto_abandon,
                "delivery count reached auto-abandon threshold, moving to backout queue"
            );
            let link = self.link()?;
            link.ensure_queue(&backout)?;
            link.put(&backout, message.clone(), syncpoint)?;
            self.last_delivery = Some(delivery_info(&message));
            TRANSPORT_DEAD_LETTER_TOTAL.inc();
            TRANSPORT_GET_TOTAL.with_label_values(&["dead_lettered"]).inc();
            return Ok(GetResult::DeadLettered);
        }

        if let Some(backup) = self.backup_queue.clone() {
            let link = self.link()?;
            link.ensure_queue(&backup)?;
            link.put(&backup, message.clone(), syncpoint)?;
        }

        buf.clear();
        buf.extend_from_slice(&message.payload);
        self.last_delivery = Some(delivery_info(&message));
        TRANSPORT_GET_TOTAL.with_label_values(&["delivered"]).inc();
        Ok(GetResult::Delivered)
    }
}

impl<L: BrokerLink> TransportHelper for Session<L> {
    fn connect(&mut self, target: &str, force: bool) -> Result<()> {
        let target = if target.is_empty() {
            self.target
                .clone()
                .ok_or_else(|| Error::Config("no broker target to reconnect to".to_string()))?
        } else {
            target.to_string()
        };

        if let Some(current) = &self.target {
            if self.link.is_some() && *current == target && !force {
                return Ok(());
            }
        }
        if self.link.is_some() {
            self.disconnect()?;
        }

        let link = L::attach(&target, self.config.security.as_ref())?;
        info!(target = %target, "broker session established");
        self.link = Some(link);
        self.target = Some(target);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(mut link) = self.link.take() {
            link.detach()?;
        }
        self.open_queue = None;
        self.open_count = 0;
        debug!("broker session closed");
        Ok(())
    }

    fn open_queue(&mut self, name: &str) -> Result<()> {
        match &self.open_queue {
            Some(open) if open == name => {
                self.open_count += 1;
                Ok(())
            }
            Some(open) => Err(Error::QueueBusy {
                open: open.clone(),
                requested: name.to_string(),
            }),
            None => {
                self.link()?.ensure_queue(name)?;
                self.open_queue = Some(name.to_string());
                self.open_count = 1;
                debug!(queue = %name, "queue opened");
                Ok(())
            }
        }
    }

    fn close_queue(&mut self) -> Result<()> {
        if self.open_count == 0 {
            return Err(Error::NoQueueOpen);
        }
        self.open_count -= 1;
        if self.open_count == 0 {
            if let Some(queue) = self.open_queue.take() {
                debug!(queue = %queue, "queue closed");
            }
        }
        Ok(())
    }

    fn get_one(&mut self, buf: &mut BytesMut, syncpoint: bool) -> Result<GetResult> {
        let queue = self.require_open()?;
        let selector = Selector {
            msg_id: self.pending.msg_id.clone(),
            correl_id: self.pending.correl_id.clone(),
            group_id: self.pending.group_id.clone(),
            group_seq: None,
        };
        let wait = Duration::from_millis(self.config.wait_interval_ms);

        match self.link()?.get(&queue, &selector, syncpoint, wait)? {
            None => {
                // Selectors stay armed so the caller can poll for the same
                // message again.
                TRANSPORT_GET_TOTAL.with_label_values(&["no_match"]).inc();
                Ok(GetResult::NoMatch)
            }
            Some(message) => self.accept_delivery(message, buf, syncpoint),
        }
    }

    fn get_group_message(&mut self, group: &GroupId, buf: &mut BytesMut) -> Result<GetResult> {
        let queue = self.require_open()?;
        let next = self.group_cursors.get(group).copied().unwrap_or(1);
        let selector = Selector {
            msg_id: None,
            correl_id: None,
            group_id: Some(group.clone()),
            group_seq: Some(next),
        };
        // In-order group consumption deliberately waits longer for the
        // next member to show up.
        let wait = Duration::from_millis(self.config.group_wait_ms);

        match self.link()?.get(&queue, &selector, true, wait)? {
            None => {
                TRANSPORT_GET_TOTAL.with_label_values(&["no_match"]).inc();
                Ok(GetResult::NoMatch)
            }
            Some(message) => {
                let last = message.group.as_ref().map(|g| g.last).unwrap_or(false);
                let outcome = self.accept_delivery(message, buf, true)?;
                if last {
                    self.group_cursors.remove(group);
                } else {
                    self.group_cursors.insert(group.clone(), next + 1);
                }
                Ok(outcome)
            }
        }
    }

    fn put_one(&mut self, payload: &[u8], syncpoint: bool) -> Result<()> {
        let message = self.build_message(
            payload,
            MessageKind::Datagram,
            FEEDBACK_NONE,
            None,
            None,
            None,
            ReplyOptions::new(),
        );
        self.send(message, syncpoint, "datagram")
    }

    fn put_group_message(
        &mut self,
        payload: &[u8],
        group: &GroupId,
        sequence: u32,
        last: bool,
    ) -> Result<()> {
        let header = GroupHeader {
            id: group.clone(),
            sequence,
            last,
        };
        let message = self.build_message(
            payload,
            MessageKind::Datagram,
            FEEDBACK_NONE,
            Some(header),
            None,
            None,
            ReplyOptions::new(),
        );
        self.send(message, true, "group")
    }

    fn put_request(
        &mut self,
        payload: &[u8],
        reply_to_queue: &str,
        reply_to_broker: &str,
        options: &ReplyOptions,
    ) -> Result<()> {
        let message = self.build_message(
            payload,
            MessageKind::Request,
            FEEDBACK_NONE,
            None,
            Some(reply_to_queue.to_string()),
            Some(reply_to_broker.to_string()),
            options.clone(),
        );
        self.send(message, true, "request")
    }

    fn put_reply(&mut self, payload: &[u8], feedback: i32) -> Result<()> {
        let message = self.build_message(
            payload,
            MessageKind::Reply,
            feedback,
            None,
            None,
            None,
            ReplyOptions::new(),
        );
        self.send(message, true, "reply")
    }

    fn commit(&mut self) -> Result<()> {
        self.link()?.commit()?;
        self.committed_cursors = self.group_cursors.clone();
        TRANSPORT_UOW_TOTAL.with_label_values(&["commit"]).inc();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.link()?.rollback()?;
        // Rolled-back group members will be redelivered; rewind the
        // cursors to the last committed point.
        self.group_cursors = self.committed_cursors.clone();
        TRANSPORT_UOW_TOTAL.with_label_values(&["rollback"]).inc();
        Ok(())
    }

    fn peek(&mut self, queue: &str, first: bool) -> Result<GetResult> {
        match self.link()?.browse(queue, first)? {
            Some(_) => Ok(GetResult::Delivered),
            None => Ok(GetResult::NoMatch),
        }
    }

    fn queue_depth(&mut self, queue: &str) -> Result<usize> {
        self.link()?.depth(queue)
    }

    fn set_msg_id(&mut self, id: MsgId) {
        self.pending.msg_id = Some(id);
    }

    fn set_correl_id(&mut self, id: CorrelId) {
        self.pending.correl_id = Some(id);
    }

    fn set_group_id(&mut self, id: GroupId) {
        self.pending.group_id = Some(id);
    }

    fn set_application_name(&mut self, name: &str) {
        self.pending.app_name = Some(name.to_string());
    }

    fn set_format(&mut self, format: PayloadFormat) {
        self.format = format;
    }

    fn set_auto_abandon(&mut self, threshold: u32) {
        self.auto_abandon = threshold;
    }

    fn set_backup_queue(&mut self, queue: &str) {
        self.backup_queue = if queue.is_empty() {
            None
        } else {
            Some(queue.to_string())
        };
    }

    fn last_delivery(&self) -> Option<&DeliveryInfo> {
        self.last_delivery.as_ref()
    }
}

fn delivery_info(message: &StoredMessage) -> DeliveryInfo {
    DeliveryInfo {
        msg_id: message.msg_id.clone(),
        correl_id: message.correl_id.clone(),
        group: message.group.clone(),
        kind: message.kind,
        feedback: message.feedback,
        reply_to_queue: message.reply_to_queue.clone(),
        reply_to_broker: message.reply_to_broker.clone(),
        app_name: message.app_name.clone(),
        put_time: message.put_time,
        format: message.format,
        delivery_count: message.delivery_count,
    }
}
