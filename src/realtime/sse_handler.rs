use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use utoipa::IntoParams;
use uuid::Uuid;

use super::events::Channel;
use crate::{
    error::Result,
    middleware::AuthUser,
    presence::{presence_models::TransportKind, ConnectionRegistry},
    state::AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventStreamQuery {
    /// Limit the stream to one conversation (plus the caller's own channel).
    pub conversation_id: Option<i64>,
}

/// Keeps an SSE connection registered for as long as the response stream
/// is alive.
struct SseConnection {
    registry: ConnectionRegistry,
    connection_id: Uuid,
    heartbeat: JoinHandle<()>,
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.heartbeat.abort();
        let registry = self.registry.clone();
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            if let Err(e) = registry.unregister(connection_id).await {
                tracing::error!(%connection_id, "failed to unregister sse connection: {}", e);
            }
        });
    }
}

/// Subscribe to realtime events via Server-Sent Events
#[utoipa::path(
    get,
    path = "/api/events",
    params(EventStreamQuery),
    responses(
        (status = 200, description = "SSE stream of conversation events"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant of the conversation")
    ),
    tag = "realtime",
    security(("bearer_auth" = []))
)]
pub async fn event_stream(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<EventStreamQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let mut channels = vec![Channel::User(user_id)];
    match query.conversation_id {
        Some(conversation_id) => {
            state
                .conversation_service
                .ensure_access(conversation_id, user_id)
                .await?;
            channels.push(Channel::Conversation(conversation_id));
        }
        None => channels.extend(
            state
                .conversation_service
                .conversation_ids(user_id)
                .await?
                .into_iter()
                .map(Channel::Conversation),
        ),
    }

    let connection_id = Uuid::new_v4();
    state
        .connection_registry
        .register(user_id, connection_id, TransportKind::Sse)
        .await?;

    let registry = state.connection_registry.clone();
    let interval = state.config.heartbeat_interval();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = registry.heartbeat(connection_id).await {
                tracing::warn!(%connection_id, "heartbeat failed: {}", e);
            }
        }
    });
    let guard = SseConnection {
        registry: state.connection_registry.clone(),
        connection_id,
        heartbeat,
    };

    let receivers = channels
        .into_iter()
        .map(|channel| BroadcastStream::new(state.bus.subscribe(channel)));

    let stream = stream::select_all(receivers)
        .filter_map(|msg| async move {
            match msg {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => Some(Ok(Event::default().event(envelope.kind.as_str()).data(json))),
                    Err(_) => None,
                },
                // lagged receivers skip what they missed
                Err(_) => None,
            }
        })
        .map(move |event| {
            let _connection = &guard;
            event
        });

    tracing::info!(user_id, %connection_id, "sse stream opened");
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.sse_keepalive())))
}
