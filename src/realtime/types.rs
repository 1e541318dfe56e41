use serde::{Deserialize, Serialize};

use super::events::EventEnvelope;

/// Frames a WebSocket client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Typing { conversation_id: i64, is_typing: bool },
    MarkRead { conversation_id: i64 },
    MarkDelivered { message_ids: Vec<i64> },
    /// Subscribes this socket to a conversation created after it connected.
    JoinConversation { conversation_id: i64 },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Joined { conversation_id: i64 },
    Error { message: String },
    Ping,
    Pong,
}

/// Everything a WebSocket server writes: bus events keep their envelope
/// shape, control frames carry their own `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(EventEnvelope),
    Control(ControlFrame),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::{Channel, EventKind};

    #[test]
    fn client_frames_parse_by_type() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"typing","conversation_id":3,"is_typing":true}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Typing {
                conversation_id: 3,
                is_typing: true
            }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn events_keep_envelope_shape_on_the_socket() {
        let envelope = EventEnvelope::new(
            EventKind::ReadReceipt,
            Channel::Conversation(9),
            &serde_json::json!({ "reader_id": 1 }),
        );
        let json = serde_json::to_value(ServerFrame::Event(envelope)).unwrap();
        assert_eq!(json["type"], "read_receipt");
        assert_eq!(json["scope_id"], "conversation:9");

        let json = serde_json::to_value(ServerFrame::Control(ControlFrame::Pong)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "pong" }));
    }
}
