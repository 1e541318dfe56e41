use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use super::{
    bus::EventBus,
    events::Channel,
    types::{ClientMessage, ControlFrame, ServerFrame},
};
use crate::{
    error::{AppError, Result},
    middleware::AuthUser,
    presence::presence_models::TransportKind,
    state::AppState,
};

type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// Bus channels one socket listens on. Each channel is pumped by its own
/// task into the socket's outbound queue; dropping the set stops them all.
struct Subscriptions {
    bus: EventBus,
    tx: FrameSender,
    tasks: HashMap<Channel, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(bus: EventBus, tx: FrameSender) -> Self {
        Self {
            bus,
            tx,
            tasks: HashMap::new(),
        }
    }

    /// Returns false when the channel was already subscribed.
    fn join(&mut self, channel: Channel) -> bool {
        if self.tasks.contains_key(&channel) {
            return false;
        }

        let mut rx = self.bus.subscribe(channel);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if tx.send(ServerFrame::Event(envelope)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%channel, skipped, "websocket subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(channel, task);
        true
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

/// Realtime WebSocket.
///
/// The socket receives every event of the caller's user channel and of each
/// conversation they take part in. Clients send JSON frames tagged by `type`:
/// `typing`, `mark_read`, `mark_delivered`, `join_conversation` and `ping`.
#[utoipa::path(
    get,
    path = "/api/ws",
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "realtime",
    security(("bearer_auth" = []))
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: i64, state: AppState) {
    let connection_id = Uuid::new_v4();
    if let Err(e) = state
        .connection_registry
        .register(user_id, connection_id, TransportKind::WebSocket)
        .await
    {
        tracing::error!(user_id, "failed to register websocket connection: {}", e);
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let mut subscriptions = Subscriptions::new(state.bus.clone(), tx.clone());
    subscriptions.join(Channel::User(user_id));
    match state.conversation_service.conversation_ids(user_id).await {
        Ok(ids) => {
            for id in ids {
                subscriptions.join(Channel::Conversation(id));
            }
        }
        Err(e) => tracing::warn!(user_id, "could not load conversations for websocket: {}", e),
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&frame) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let state_clone = state.clone();
    let tx_clone = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = process_client_message(
                        &text,
                        user_id,
                        connection_id,
                        &state_clone,
                        &mut subscriptions,
                        &tx_clone,
                    )
                    .await
                    {
                        tracing::debug!(user_id, "rejected websocket frame: {}", e);
                        let _ = tx_clone.send(ServerFrame::Control(ControlFrame::Error {
                            message: e.to_string(),
                        }));
                    }
                }
                // only the client's answers keep the connection fresh
                Message::Ping(_) | Message::Pong(_) => {
                    if let Err(e) = state_clone.connection_registry.heartbeat(connection_id).await {
                        tracing::warn!(%connection_id, "heartbeat failed: {}", e);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut heartbeat_task = tokio::spawn(ping_loop(tx.clone(), state.config.heartbeat_interval()));

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut heartbeat_task => {
            send_task.abort();
            recv_task.abort();
        }
    }

    if let Err(e) = state.connection_registry.unregister(connection_id).await {
        tracing::error!(%connection_id, "failed to unregister websocket connection: {}", e);
    }
    tracing::info!(user_id, %connection_id, "websocket closed");
}

/// Pings the client every `interval` until the socket's outbound queue
/// closes. Liveness is recorded when the client answers, never here.
async fn ping_loop(tx: FrameSender, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if tx.send(ServerFrame::Control(ControlFrame::Ping)).is_err() {
            break;
        }
    }
}

async fn process_client_message(
    text: &str,
    user_id: i64,
    connection_id: Uuid,
    state: &AppState,
    subscriptions: &mut Subscriptions,
    tx: &FrameSender,
) -> Result<()> {
    let client_msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AppError::BadRequest(format!("Invalid message format: {}", e)))?;

    match client_msg {
        ClientMessage::Typing {
            conversation_id,
            is_typing,
        } => {
            state
                .conversation_service
                .set_typing(conversation_id, user_id, is_typing)
                .await?;
        }

        ClientMessage::MarkRead { conversation_id } => {
            state
                .conversation_service
                .mark_read(conversation_id, user_id)
                .await?;
        }

        ClientMessage::MarkDelivered { message_ids } => {
            state
                .reaction_service
                .mark_delivered(&message_ids, user_id)
                .await?;
        }

        ClientMessage::JoinConversation { conversation_id } => {
            state
                .conversation_service
                .ensure_access(conversation_id, user_id)
                .await?;
            subscriptions.join(Channel::Conversation(conversation_id));
            let _ = tx.send(ServerFrame::Control(ControlFrame::Joined { conversation_id }));
        }

        ClientMessage::Ping => {
            state.connection_registry.heartbeat(connection_id).await?;
            let _ = tx.send(ServerFrame::Control(ControlFrame::Pong));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn ping_loop_only_pings_and_stops_with_the_socket() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pinger = tokio::spawn(ping_loop(tx, Duration::from_millis(10)));

        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            assert!(matches!(frame, ServerFrame::Control(ControlFrame::Ping)));
        }

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), pinger)
            .await
            .unwrap()
            .unwrap();
    }
}
