use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use super::conversation_dto::{
    BlockRequest, ConversationView, CreateConversationRequest, TypingRequest, UpdateStatusRequest,
};
use crate::{
    error::Result,
    message::message_dto::MarkReadResponse,
    middleware::AuthUser,
    pagination::{PageParams, PaginatedResponse},
    state::AppState,
};

/// List your conversations, most recent activity first
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    params(PageParams),
    responses(
        (status = 200, description = "Conversations of the caller", body = PaginatedResponse<ConversationView>),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let page = state.conversation_service.list(user_id, params).await?;
    Ok(Json(page))
}

/// Start (or reopen) a conversation with a seller about an article
#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationView),
        (status = 200, description = "Conversation already existed", body = ConversationView),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Article not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let (view, created) = state
        .conversation_service
        .find_or_create(user_id, payload.article_id, payload.seller_id)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(view)))
}

/// Get one conversation
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "The conversation", body = ConversationView),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = state.conversation_service.get(conversation_id, user_id).await?;
    Ok(Json(view))
}

/// Mark all messages from the other participant as read
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/read",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "Messages marked read", body = MarkReadResponse),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let result = state
        .conversation_service
        .mark_read(conversation_id, user_id)
        .await?;
    Ok(Json(result))
}

/// Set or clear your typing indicator
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/typing",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body = TypingRequest,
    responses(
        (status = 204, description = "Typing status updated"),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn set_typing(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<TypingRequest>,
) -> Result<impl IntoResponse> {
    state
        .conversation_service
        .set_typing(conversation_id, user_id, payload.is_typing)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Block the other participant in this conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/block",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body = BlockRequest,
    responses(
        (status = 200, description = "Conversation blocked", body = ConversationView),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn block_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<BlockRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let view = state
        .conversation_service
        .block(conversation_id, user_id, payload.reason.as_deref())
        .await?;
    Ok(Json(view))
}

/// Lift a block you placed
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/unblock",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "Block lifted", body = ConversationView),
        (status = 403, description = "You did not block this conversation")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unblock_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = state
        .conversation_service
        .unblock(conversation_id, user_id)
        .await?;
    Ok(Json(view))
}

/// Archive or restore a conversation
#[utoipa::path(
    patch,
    path = "/api/conversations/{id}/status",
    tag = "conversations",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ConversationView),
        (status = 400, description = "Blocking goes through the block endpoint"),
        (status = 409, description = "Conversation is blocked")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse> {
    let view = state
        .conversation_service
        .set_status(conversation_id, user_id, payload.status)
        .await?;
    Ok(Json(view))
}
