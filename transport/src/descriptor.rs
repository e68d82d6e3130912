//! Delivery metadata captured from retrieved messages

use crate::identity::{CorrelId, GroupId, MsgId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feedback code meaning "no feedback"
pub const FEEDBACK_NONE: i32 = 0;

/// Wire role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// One-way message, no reply expected
    Datagram,
    /// Message expecting a correlated reply
    Request,
    /// Reply to a request, carrying a feedback code
    Reply,
    /// Broker-generated status report
    Report,
}

/// Body format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// Plain text
    Text,
    /// Raw bytes
    Bytes,
    /// Enveloped payload (outer structure supplied by the connector)
    Enveloped,
}

/// Group membership stamped on one member of an ordered group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHeader {
    /// Group identity shared by all members
    pub id: GroupId,
    /// 1-based position within the group
    pub sequence: u32,
    /// End-of-group marker
    pub last: bool,
}

/// Everything captured from the most recently retrieved message.
///
/// Refreshed by each successful `get_one`/`get_group_message`; callers read
/// it to route replies and interpret feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryInfo {
    /// Message identity
    pub msg_id: MsgId,
    /// Correlation identity, when stamped
    pub correl_id: Option<CorrelId>,
    /// Group membership, when part of an ordered group
    pub group: Option<GroupHeader>,
    /// Wire role
    pub kind: MessageKind,
    /// Feedback/reason code (replies and reports)
    pub feedback: i32,
    /// Queue replies should be sent to
    pub reply_to_queue: Option<String>,
    /// Broker hosting the reply queue
    pub reply_to_broker: Option<String>,
    /// Name of the application that put the message
    pub app_name: String,
    /// Broker-side put timestamp
    pub put_time: DateTime<Utc>,
    /// Body format tag
    pub format: PayloadFormat,
    /// Times this message has been delivered and rolled back
    pub delivery_count: u32,
}
