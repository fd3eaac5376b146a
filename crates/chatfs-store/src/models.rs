//! Records persisted in the history database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatfs_shared::{ChatId, MessageId};

/// A chat directory remembered across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRecord {
    /// Directory name.
    pub handle: String,
    pub chat_id: ChatId,
}

/// A single message. Backend messages are much richer; this is the part
/// chatfs renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    /// When the message was sent, as reported by the backend.
    pub sent_at: DateTime<Utc>,
    /// Display handle of the sender; empty when unknown.
    pub sender: String,
    /// Text of the message this one replies to; empty when not a reply or
    /// when the target is unknown.
    pub quoted_text: String,
    pub text: String,
    pub is_outgoing: bool,
}
