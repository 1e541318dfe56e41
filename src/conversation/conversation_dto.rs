use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::conversation_models::{ConversationStatus, Side};
use crate::{directory::ArticleSummary, message::message_models::MessageType};

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CreateConversationRequest {
    #[validate(range(min = 1))]
    pub article_id: i64,
    #[validate(range(min = 1))]
    pub seller_id: i64,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct TypingRequest {
    pub is_typing: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Validate, ToSchema)]
pub struct BlockRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// `active` or `archived`
    pub status: ConversationStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LastMessagePreview {
    pub preview: String,
    pub message_type: MessageType,
    pub sender_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversationView {
    pub id: i64,
    pub article_id: i64,
    pub article: Option<ArticleSummary>,
    pub status: ConversationStatus,
    pub role: Side,
    pub counterpart_id: i64,
    pub counterpart_online: bool,
    pub counterpart_last_seen: Option<DateTime<Utc>>,
    pub counterpart_typing: bool,
    pub unread_count: i32,
    pub last_message: Option<LastMessagePreview>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
