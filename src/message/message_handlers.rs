use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::{
    error::Result,
    message::{
        message_dto::{
            EditMessageRequest, MarkMessagesReadRequest, MarkReadResponse, MessageListQuery, SearchQuery,
            SendMessageRequest, SendOfferRequest,
        },
        message_models::MessageResponse,
    },
    middleware::AuthUser,
    pagination::PaginatedResponse,
    state::AppState,
};

/// Send a text message into a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent", body = MessageResponse),
        (status = 400, description = "Invalid content"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant, or the conversation is blocked"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let message = state
        .message_service
        .send(conversation_id, user_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Make a price offer in a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/offers",
    tag = "messages",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body = SendOfferRequest,
    responses(
        (status = 201, description = "Offer sent", body = MessageResponse),
        (status = 400, description = "Invalid amount"),
        (status = 403, description = "Not a participant, or the conversation is blocked")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_offer(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<SendOfferRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let message = state
        .message_service
        .create_offer_message(conversation_id, user_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// List messages of a conversation in chronological order
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = i64, Path, description = "Conversation ID"),
        MessageListQuery
    ),
    responses(
        (status = 200, description = "One page of messages", body = PaginatedResponse<MessageResponse>),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessageListQuery>,
) -> Result<impl IntoResponse> {
    let page = state
        .message_service
        .list_page(conversation_id, user_id, &query)
        .await?;

    Ok(Json(page))
}

/// Mark specific messages as read
#[utoipa::path(
    post,
    path = "/api/messages/read",
    tag = "messages",
    request_body = MarkMessagesReadRequest,
    responses(
        (status = 200, description = "Messages marked read, per conversation", body = Vec<MarkReadResponse>),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "No such messages")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_messages_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<MarkMessagesReadRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let results = state
        .message_service
        .mark_many_read(user_id, &payload.message_ids)
        .await?;

    Ok(Json(results))
}

/// Edit one of your own text messages
#[utoipa::path(
    patch,
    path = "/api/messages/{id}",
    tag = "messages",
    params(("id" = i64, Path, description = "Message ID")),
    request_body = EditMessageRequest,
    responses(
        (status = 200, description = "Message edited", body = MessageResponse),
        (status = 403, description = "Not the sender, or not a text message"),
        (status = 404, description = "Message not found"),
        (status = 409, description = "Message was deleted")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn edit_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
    Json(payload): Json<EditMessageRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let message = state
        .message_service
        .edit(message_id, user_id, payload)
        .await?;

    Ok(Json(message))
}

/// Delete one of your own text messages
#[utoipa::path(
    delete,
    path = "/api/messages/{id}",
    tag = "messages",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Message replaced by a deletion marker", body = MessageResponse),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found"),
        (status = 409, description = "Message was already deleted")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .soft_delete(message_id, user_id)
        .await?;

    Ok(Json(message))
}

/// Search messages across your conversations
#[utoipa::path(
    get,
    path = "/api/messages/search",
    tag = "messages",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching messages, newest first", body = PaginatedResponse<MessageResponse>),
        (status = 400, description = "Empty query")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn search_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse> {
    let results = state.message_service.search(user_id, query).await?;
    Ok(Json(results))
}
