use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use super::{
    bus::EventBus,
    events::{
        Channel, EventEnvelope, EventKind, MessageUpdateAction, MessageUpdatePayload,
        NewMessagePayload, ReactionUpdatePayload, ReadReceiptPayload, TypingStatusPayload,
        UserStatusPayload,
    },
};
use crate::{
    conversation::conversation_models::Conversation,
    message::message_models::MessageResponse,
    reaction::reaction_models::ReactionSummary,
};

/// Domain-level publisher. Every method runs strictly after the
/// corresponding write committed, and none of them can fail the caller.
#[derive(Clone)]
pub struct Broadcaster {
    bus: EventBus,
    typing_ttl: Duration,
}

impl Broadcaster {
    pub fn new(bus: EventBus, typing_ttl: Duration) -> Self {
        Self { bus, typing_ttl }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn typing_ttl(&self) -> Duration {
        self.typing_ttl
    }

    async fn emit<T: serde::Serialize>(&self, kind: EventKind, channel: Channel, payload: &T) {
        self.bus
            .publish(EventEnvelope::new(kind, channel, payload))
            .await;
    }

    /// Publishes to the conversation channel and to the user channel of
    /// every recipient, the latter carrying that recipient's unread count
    /// and, when known, their total across conversations.
    pub async fn new_message(
        &self,
        conversation: &Conversation,
        message: &MessageResponse,
        total_unread: &HashMap<i64, i64>,
    ) {
        let message_json = serde_json::to_value(message).unwrap_or(serde_json::Value::Null);

        self.emit(
            EventKind::NewMessage,
            Channel::Conversation(conversation.id),
            &NewMessagePayload {
                conversation_id: conversation.id,
                message: message_json.clone(),
                unread_count: None,
                total_unread: None,
            },
        )
        .await;

        for recipient in conversation.participants() {
            if recipient == message.sender_id {
                continue;
            }
            let unread = conversation
                .side_of(recipient)
                .map(|side| conversation.unread_for(side));
            self.emit(
                EventKind::NewMessage,
                Channel::User(recipient),
                &NewMessagePayload {
                    conversation_id: conversation.id,
                    message: message_json.clone(),
                    unread_count: unread,
                    total_unread: total_unread.get(&recipient).copied(),
                },
            )
            .await;
        }
    }

    pub async fn typing(&self, conversation_id: i64, user_id: i64, is_typing: bool) {
        let payload = TypingStatusPayload::new(conversation_id, user_id, is_typing, self.typing_ttl);
        self.emit(
            EventKind::TypingStatus,
            Channel::Conversation(conversation_id),
            &payload,
        )
        .await;
    }

    pub async fn read_receipt(&self, conversation_id: i64, reader_id: i64, message_ids: Vec<i64>) {
        if message_ids.is_empty() {
            return;
        }
        self.emit(
            EventKind::ReadReceipt,
            Channel::Conversation(conversation_id),
            &ReadReceiptPayload {
                conversation_id,
                reader_id,
                message_ids,
                read_at: Utc::now(),
            },
        )
        .await;
    }

    pub async fn message_update(
        &self,
        conversation_id: i64,
        message_id: i64,
        action: MessageUpdateAction,
        content: &str,
    ) {
        self.emit(
            EventKind::MessageUpdate,
            Channel::Conversation(conversation_id),
            &MessageUpdatePayload {
                conversation_id,
                message_id,
                action,
                content: content.to_string(),
                updated_at: Utc::now(),
            },
        )
        .await;
    }

    pub async fn reaction_update(
        &self,
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        reactions: Vec<ReactionSummary>,
    ) {
        self.emit(
            EventKind::ReactionUpdate,
            Channel::Conversation(conversation_id),
            &ReactionUpdatePayload {
                conversation_id,
                message_id,
                user_id,
                reactions,
            },
        )
        .await;
    }

    /// Presence changes reach every conversation the user takes part in.
    pub async fn user_status(
        &self,
        user_id: i64,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
        conversation_ids: &[i64],
    ) {
        let payload = UserStatusPayload {
            user_id,
            is_online,
            last_seen,
        };
        for conversation_id in conversation_ids {
            self.emit(
                EventKind::UserStatus,
                Channel::Conversation(*conversation_id),
                &payload,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_models::fixtures::conversation;
    use crate::message::message_models::{fixtures::message, MessageType};

    #[tokio::test]
    async fn new_message_reaches_conversation_and_recipient_channels() {
        let bus = EventBus::local(16);
        let broadcaster = Broadcaster::new(bus.clone(), Duration::seconds(10));
        let mut conv = conversation(10, 20);
        conv.seller_unread = 1;

        let mut conv_rx = bus.subscribe(Channel::Conversation(conv.id));
        let mut seller_rx = bus.subscribe(Channel::User(20));
        let mut buyer_rx = bus.subscribe(Channel::User(10));

        let msg = MessageResponse::from(message(5, 10, MessageType::Text, "Is this available?"));
        let totals = HashMap::from([(20, 3)]);
        broadcaster.new_message(&conv, &msg, &totals).await;

        let on_conv = conv_rx.recv().await.unwrap();
        assert_eq!(on_conv.kind, EventKind::NewMessage);
        assert!(on_conv.payload["unread_count"].is_null());

        let on_seller = seller_rx.recv().await.unwrap();
        assert_eq!(on_seller.scope_id, "user:20");
        assert_eq!(on_seller.payload["unread_count"], 1);
        assert_eq!(on_seller.payload["total_unread"], 3);
        assert_eq!(on_seller.payload["message"]["content"], "Is this available?");

        assert!(buyer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn system_message_reaches_both_participants() {
        let bus = EventBus::local(16);
        let broadcaster = Broadcaster::new(bus.clone(), Duration::seconds(10));
        let conv = conversation(10, 20);
        let mut buyer_rx = bus.subscribe(Channel::User(10));
        let mut seller_rx = bus.subscribe(Channel::User(20));

        let msg = MessageResponse::from(message(6, 0, MessageType::System, "blocked"));
        broadcaster.new_message(&conv, &msg, &HashMap::new()).await;

        assert!(buyer_rx.recv().await.is_ok());
        assert!(seller_rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn user_status_fans_out_to_each_conversation() {
        let bus = EventBus::local(16);
        let broadcaster = Broadcaster::new(bus.clone(), Duration::seconds(10));
        let mut a = bus.subscribe(Channel::Conversation(1));
        let mut b = bus.subscribe(Channel::Conversation(2));

        broadcaster.user_status(7, false, Some(Utc::now()), &[1, 2]).await;

        assert_eq!(a.recv().await.unwrap().kind, EventKind::UserStatus);
        assert_eq!(b.recv().await.unwrap().payload["user_id"], 7);
    }

    #[tokio::test]
    async fn typing_events_carry_expiry() {
        let bus = EventBus::local(16);
        let broadcaster = Broadcaster::new(bus.clone(), Duration::seconds(10));
        let mut rx = bus.subscribe(Channel::Conversation(3));

        broadcaster.typing(3, 10, true).await;

        let event = rx.recv().await.unwrap();
        let payload: TypingStatusPayload = serde_json::from_value(event.payload).unwrap();
        assert!(payload.is_active_at(Utc::now()));
        assert!(!payload.is_active_at(Utc::now() + Duration::seconds(11)));
    }

    #[tokio::test]
    async fn empty_read_receipts_are_not_published() {
        let bus = EventBus::local(16);
        let broadcaster = Broadcaster::new(bus.clone(), Duration::seconds(10));
        let mut rx = bus.subscribe(Channel::Conversation(4));

        broadcaster.read_receipt(4, 10, Vec::new()).await;
        assert!(rx.try_recv().is_err());
    }
}
