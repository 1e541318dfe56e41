use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::{attachment::attachment_models::AttachmentResponse, reaction::reaction_models::ReactionSummary};

/// Sender id reserved for messages the platform writes itself.
pub const SYSTEM_SENDER_ID: i64 = 0;

pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
    Offer,
}

impl MessageType {
    pub fn has_attachment(self) -> bool {
        matches!(self, MessageType::Image | MessageType::File)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::Image => write!(f, "image"),
            MessageType::File => write!(f, "file"),
            MessageType::System => write!(f, "system"),
            MessageType::Offer => write!(f, "offer"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER_ID
    }

    pub fn is_deleted(&self) -> bool {
        self.message_type == MessageType::System
            && self
                .metadata
                .as_ref()
                .and_then(|m| m.get("deleted"))
                .and_then(|d| d.as_bool())
                .unwrap_or(false)
    }

    /// Edits and soft-deletes are open only to the sender of a plain text
    /// message that the platform did not write.
    pub fn is_mutable_by(&self, user_id: i64) -> bool {
        !self.is_system() && self.sender_id == user_id && self.message_type == MessageType::Text
    }
}

/// Insert parameters. Content is expected to be sanitized already.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub is_system: bool,
    pub is_deleted: bool,
    pub reactions: Vec<ReactionSummary>,
    pub attachment: Option<AttachmentResponse>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        let is_system = message.is_system();
        let is_deleted = message.is_deleted();
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            is_read: message.is_read,
            read_at: message.read_at,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            reply_to_id: message.reply_to_id,
            metadata: message.metadata,
            created_at: message.created_at,
            is_system,
            is_deleted,
            reactions: Vec::new(),
            attachment: None,
        }
    }
}
