use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Blocked,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Archived => write!(f, "archived"),
            ConversationStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Fixed participant role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buyer,
    Seller,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Buyer => Side::Seller,
            Side::Seller => Side::Buyer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Conversation {
    pub id: i64,
    pub article_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub status: ConversationStatus,
    pub buyer_unread: i32,
    pub seller_unread: i32,
    pub buyer_typing: bool,
    pub seller_typing: bool,
    pub buyer_typing_at: Option<DateTime<Utc>>,
    pub seller_typing_at: Option<DateTime<Utc>>,
    pub buyer_last_seen: Option<DateTime<Utc>>,
    pub seller_last_seen: Option<DateTime<Utc>>,
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn side_of(&self, user_id: i64) -> Option<Side> {
        if user_id == self.buyer_id {
            Some(Side::Buyer)
        } else if user_id == self.seller_id {
            Some(Side::Seller)
        } else {
            None
        }
    }

    /// Access check shared by every conversation-scoped operation.
    pub fn ensure_participant(&self, user_id: i64) -> Result<Side> {
        self.side_of(user_id).ok_or_else(|| {
            AppError::Forbidden("You are not a participant in this conversation".to_string())
        })
    }

    pub fn participant(&self, side: Side) -> i64 {
        match side {
            Side::Buyer => self.buyer_id,
            Side::Seller => self.seller_id,
        }
    }

    pub fn participants(&self) -> [i64; 2] {
        [self.buyer_id, self.seller_id]
    }

    /// The participant who is not `user_id`. For the system sender this is
    /// undefined, so callers address both participants instead.
    pub fn counterpart_of(&self, user_id: i64) -> Option<i64> {
        self.side_of(user_id).map(|side| self.participant(side.other()))
    }

    pub fn unread_for(&self, side: Side) -> i32 {
        match side {
            Side::Buyer => self.buyer_unread,
            Side::Seller => self.seller_unread,
        }
    }

    pub fn last_seen_for(&self, side: Side) -> Option<DateTime<Utc>> {
        match side {
            Side::Buyer => self.buyer_last_seen,
            Side::Seller => self.seller_last_seen,
        }
    }

    /// The stored flag only counts while it is younger than `ttl`; a client
    /// that vanished mid-typing stops "typing" on its own.
    pub fn is_typing(&self, side: Side, now: DateTime<Utc>, ttl: Duration) -> bool {
        let (flag, at) = match side {
            Side::Buyer => (self.buyer_typing, self.buyer_typing_at),
            Side::Seller => (self.seller_typing, self.seller_typing_at),
        };
        flag && at.map(|at| now - at < ttl).unwrap_or(false)
    }

    pub fn accepts_messages(&self) -> bool {
        self.status != ConversationStatus::Blocked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ConversationBlock {
    pub id: i64,
    pub conversation_id: i64,
    pub blocker_id: i64,
    pub blocked_id: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn conversation(buyer_id: i64, seller_id: i64) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: 1,
            article_id: 42,
            buyer_id,
            seller_id,
            status: ConversationStatus::Active,
            buyer_unread: 0,
            seller_unread: 0,
            buyer_typing: false,
            seller_typing: false,
            buyer_typing_at: None,
            seller_typing_at: None,
            buyer_last_seen: None,
            seller_last_seen: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::conversation;
    use super::*;

    #[test]
    fn sides_resolve_for_participants_only() {
        let conv = conversation(10, 20);
        assert_eq!(conv.side_of(10), Some(Side::Buyer));
        assert_eq!(conv.side_of(20), Some(Side::Seller));
        assert_eq!(conv.side_of(30), None);
        assert_eq!(conv.counterpart_of(10), Some(20));
        assert_eq!(conv.counterpart_of(0), None);
    }

    #[test]
    fn outsiders_are_forbidden() {
        let conv = conversation(10, 20);
        assert!(matches!(conv.ensure_participant(99), Err(AppError::Forbidden(_))));
        assert_eq!(conv.ensure_participant(20).unwrap(), Side::Seller);
    }

    #[test]
    fn typing_flag_expires_after_ttl() {
        let now = Utc::now();
        let mut conv = conversation(10, 20);
        conv.buyer_typing = true;
        conv.buyer_typing_at = Some(now - Duration::seconds(3));

        assert!(conv.is_typing(Side::Buyer, now, Duration::seconds(10)));
        assert!(!conv.is_typing(Side::Buyer, now + Duration::seconds(8), Duration::seconds(10)));
        assert!(!conv.is_typing(Side::Seller, now, Duration::seconds(10)));
    }

    #[test]
    fn blocked_conversations_reject_messages() {
        let mut conv = conversation(10, 20);
        assert!(conv.accepts_messages());
        conv.status = ConversationStatus::Archived;
        assert!(conv.accepts_messages());
        conv.status = ConversationStatus::Blocked;
        assert!(!conv.accepts_messages());
    }

    #[test]
    fn status_display_matches_storage() {
        assert_eq!(ConversationStatus::Blocked.to_string(), "blocked");
    }
}
