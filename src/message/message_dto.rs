use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::message_models::MessageType;
use crate::pagination::PageParams;

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct SendMessageRequest {
    #[validate(length(min = 1))]
    pub content: String,
    pub reply_to_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct SendOfferRequest {
    #[validate(range(min = 0.01))]
    pub amount: f64,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct EditMessageRequest {
    #[validate(length(min = 1))]
    pub content: String,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct MarkMessagesReadRequest {
    #[validate(length(min = 1, max = 500))]
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub conversation_id: i64,
    pub message_ids: Vec<i64>,
    /// The caller's unread count after the read-mark.
    pub unread_count: i32,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct MessageListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Cursor: only messages older than this id. Takes precedence over `page`.
    pub before_id: Option<i64>,
}

impl MessageListQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// Search term, matched case-insensitively against message content
    pub q: String,
    pub conversation_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub message_type: Option<MessageType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}
