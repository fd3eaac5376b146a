//! Documents exchanged with the messaging backend.
//!
//! Inbound documents are decoded from their flattened form into
//! [`BackendEvent`]s; outbound [`BackendCommand`]s serialize to the tagged
//! JSON objects the backend expects.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::document::Document;
use crate::error::ProtocolError;
use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// Commands sent to the backend. Fire-and-forget: no reply is correlated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum BackendCommand {
    ViewMessages {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
        force_read: bool,
    },
    SendMessage {
        chat_id: ChatId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<MessageId>,
        input_message_content: InputMessageContent,
    },
    CheckAuthenticationCode {
        code: String,
    },
    SetAuthenticationPhoneNumber {
        phone_number: String,
    },
    CheckDatabaseEncryptionKey {
        key: String,
    },
    SetTdlibParameters {
        parameters: ClientParameters,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum InputMessageContent {
    InputMessageText { text: FormattedText },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedText {
    pub text: String,
}

/// Parameters the backend asks for before it can start a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientParameters {
    pub database_directory: String,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub api_id: i64,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub system_version: String,
    pub application_version: String,
    pub enable_storage_optimizer: bool,
}

impl BackendCommand {
    /// Mark a single message as read.
    pub fn mark_read(chat_id: ChatId, message_id: MessageId) -> Self {
        BackendCommand::ViewMessages {
            chat_id,
            message_ids: vec![message_id],
            force_read: true,
        }
    }

    /// Send plain text to a chat, optionally as a reply.
    pub fn send_text(chat_id: ChatId, text: String, reply_to: Option<MessageId>) -> Self {
        BackendCommand::SendMessage {
            chat_id,
            reply_to_message_id: reply_to,
            input_message_content: InputMessageContent::InputMessageText {
                text: FormattedText { text },
            },
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// Events recognised from the backend's update stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    UserUpdate(UserUpdate),
    NewMessage(NewMessage),
    MessageContent {
        message_id: MessageId,
        new_text: String,
    },
    AuthorizationState(AuthorizationState),
    /// Any other `@type`; logged and dropped by the consumer.
    Unknown(String),
}

/// Identity fields of a user, used to derive a directory handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUpdate {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl UserUpdate {
    /// Preference order: "first-last", "first", "last", "username". Each
    /// part is lower-cased and trimmed, and inner spaces become hyphens.
    pub fn handle(&self) -> Option<String> {
        let first = self.first_name.trim().to_lowercase();
        let last = self.last_name.trim().to_lowercase();
        let username = self.username.trim().to_lowercase();
        let handle = match (first.is_empty(), last.is_empty()) {
            (false, false) => format!("{first}-{last}"),
            (false, true) => first,
            (true, false) => last,
            (true, true) => username,
        };
        let handle = handle.trim().replace(' ', "-");
        if handle.is_empty() {
            None
        } else {
            Some(handle)
        }
    }
}

/// A message as reported by the backend, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Inner `@type` of the message object; only `"message"` is handled.
    pub kind: String,
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: Option<UserId>,
    pub is_outgoing: bool,
    pub date: DateTime<Utc>,
    pub text: String,
    pub reply_to: Option<MessageId>,
}

impl NewMessage {
    pub fn is_plain(&self) -> bool {
        self.kind == "message"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationState {
    WaitTdlibParameters,
    WaitEncryptionKey,
    WaitPhoneNumber,
    WaitCode,
    Ready,
    Other(String),
}

impl AuthorizationState {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "authorizationStateWaitTdlibParameters" => Self::WaitTdlibParameters,
            "authorizationStateWaitEncryptionKey" => Self::WaitEncryptionKey,
            "authorizationStateWaitPhoneNumber" => Self::WaitPhoneNumber,
            "authorizationStateWaitCode" => Self::WaitCode,
            "authorizationStateReady" => Self::Ready,
            other => Self::Other(other.to_string()),
        }
    }
}

impl BackendEvent {
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        Self::from_document(&Document::parse(json)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self, ProtocolError> {
        let kind = doc.kind().ok_or(ProtocolError::MissingField("@type"))?;
        let event = match kind {
            "updateUser" => BackendEvent::UserUpdate(UserUpdate {
                id: UserId(
                    doc.get_i64("user.id")
                        .ok_or(ProtocolError::MissingField("user.id"))?,
                ),
                first_name: doc.get_str("user.first_name").unwrap_or_default().to_string(),
                last_name: doc.get_str("user.last_name").unwrap_or_default().to_string(),
                username: doc.get_str("user.username").unwrap_or_default().to_string(),
            }),
            "updateNewMessage" => BackendEvent::NewMessage(decode_new_message(doc)?),
            "updateMessageContent" => BackendEvent::MessageContent {
                message_id: MessageId(
                    doc.get_i64("message_id")
                        .ok_or(ProtocolError::MissingField("message_id"))?,
                ),
                new_text: doc
                    .get_str("new_content.text.text")
                    .unwrap_or_default()
                    .to_string(),
            },
            "updateAuthorizationState" => {
                let tag = doc
                    .get_str("authorization_state.@type")
                    .ok_or(ProtocolError::MissingField("authorization_state.@type"))?;
                BackendEvent::AuthorizationState(AuthorizationState::from_tag(tag))
            }
            other => BackendEvent::Unknown(other.to_string()),
        };
        Ok(event)
    }
}

fn decode_new_message(doc: &Document) -> Result<NewMessage, ProtocolError> {
    let kind = doc
        .get_str("message.@type")
        .ok_or(ProtocolError::MissingField("message.@type"))?
        .to_string();
    let id = doc
        .get_i64("message.id")
        .ok_or(ProtocolError::MissingField("message.id"))?;
    let chat_id = doc
        .get_i64("message.chat_id")
        .ok_or(ProtocolError::MissingField("message.chat_id"))?;
    let seconds = doc.get_i64("message.date").unwrap_or(0);
    let date = DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or(ProtocolError::InvalidTimestamp(seconds))?;
    // Older backends report the sender as `sender.user_id`, newer ones as
    // `sender_id.user_id`.
    let sender_id = doc
        .get_i64("message.sender.user_id")
        .or_else(|| doc.get_i64("message.sender_id.user_id"))
        .map(UserId);
    // A reply target of zero means "not a reply".
    let reply_to = doc
        .get_i64("message.reply_to_message_id")
        .or_else(|| doc.get_i64("message.reply_to.message_id"))
        .filter(|id| *id != 0)
        .map(MessageId);

    Ok(NewMessage {
        kind,
        id: MessageId(id),
        chat_id: ChatId(chat_id),
        sender_id,
        is_outgoing: doc.get_bool("message.is_outgoing").unwrap_or(false),
        date,
        text: doc
            .get_str("message.content.text.text")
            .unwrap_or_default()
            .trim()
            .to_string(),
        reply_to,
    })
}
