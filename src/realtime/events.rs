use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::reaction::reaction_models::ReactionSummary;

/// Fan-out scope. Conversation channels reach both participants, user
/// channels reach every device of one user regardless of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Conversation(i64),
    User(i64),
}

impl Channel {
    pub fn parse(name: &str) -> Option<Self> {
        let (scope, id) = name.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match scope {
            "conversation" => Some(Channel::Conversation(id)),
            "user" => Some(Channel::User(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Conversation(id) => write!(f, "conversation:{}", id),
            Channel::User(id) => write!(f, "user:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    TypingStatus,
    ReadReceipt,
    MessageUpdate,
    ReactionUpdate,
    UserStatus,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::TypingStatus => "typing_status",
            EventKind::ReadReceipt => "read_receipt",
            EventKind::MessageUpdate => "message_update",
            EventKind::ReactionUpdate => "reaction_update",
            EventKind::UserStatus => "user_status",
        }
    }
}

/// Wire envelope: `{type, scope_id, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub scope_id: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(kind: EventKind, channel: Channel, payload: &T) -> Self {
        Self {
            kind,
            scope_id: channel.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        Channel::parse(&self.scope_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMessagePayload {
    pub conversation_id: i64,
    pub message: serde_json::Value,
    /// Unread count of the user the event is addressed to, for badges.
    /// Absent on the conversation channel.
    pub unread_count: Option<i32>,
    /// The addressee's unread total across all conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_unread: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TypingStatusPayload {
    pub conversation_id: i64,
    pub user_id: i64,
    pub is_typing: bool,
    pub expires_at: DateTime<Utc>,
}

impl TypingStatusPayload {
    pub fn new(conversation_id: i64, user_id: i64, is_typing: bool, ttl: Duration) -> Self {
        Self {
            conversation_id,
            user_id,
            is_typing,
            expires_at: Utc::now() + ttl,
        }
    }

    /// A typing event that was not renewed before `expires_at` reads as
    /// "not typing", whether or not a stop event ever arrived.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_typing && now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadReceiptPayload {
    pub conversation_id: i64,
    pub reader_id: i64,
    pub message_ids: Vec<i64>,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageUpdateAction {
    Edited,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageUpdatePayload {
    pub conversation_id: i64,
    pub message_id: i64,
    pub action: MessageUpdateAction,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReactionUpdatePayload {
    pub conversation_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub reactions: Vec<ReactionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserStatusPayload {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_round_trip() {
        assert_eq!(Channel::Conversation(12).to_string(), "conversation:12");
        assert_eq!(Channel::parse("user:7"), Some(Channel::User(7)));
        assert_eq!(Channel::parse("conversation:x"), None);
        assert_eq!(Channel::parse("group:1"), None);
    }

    #[test]
    fn envelope_serializes_with_wire_field_names() {
        let payload = UserStatusPayload {
            user_id: 3,
            is_online: true,
            last_seen: None,
        };
        let envelope = EventEnvelope::new(EventKind::UserStatus, Channel::User(3), &payload);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "user_status");
        assert_eq!(json["scope_id"], "user:3");
        assert_eq!(json["payload"]["is_online"], true);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn typing_event_expires_without_stop_event() {
        let payload = TypingStatusPayload::new(1, 2, true, Duration::seconds(10));
        let now = Utc::now();

        assert!(payload.is_active_at(now));
        assert!(!payload.is_active_at(now + Duration::seconds(11)));
    }

    #[test]
    fn explicit_stop_is_never_active() {
        let payload = TypingStatusPayload::new(1, 2, false, Duration::seconds(10));
        assert!(!payload.is_active_at(Utc::now()));
    }
}
