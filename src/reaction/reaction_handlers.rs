use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use validator::Validate;

use super::{
    reaction_dto::{AddReactionRequest, RemoveReactionQuery},
    reaction_models::{DeliveryStatus, ReactionSummary},
};
use crate::{error::Result, middleware::AuthUser, state::AppState};

/// React to a message with an emoji
#[utoipa::path(
    post,
    path = "/api/messages/{id}/reactions",
    tag = "reactions",
    params(("id" = i64, Path, description = "Message ID")),
    request_body = AddReactionRequest,
    responses(
        (status = 200, description = "Reaction summary after the change", body = Vec<ReactionSummary>),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Message not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn add_reaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
    Json(payload): Json<AddReactionRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let summary = state
        .reaction_service
        .add(message_id, user_id, &payload.emoji)
        .await?;

    Ok(Json(summary))
}

/// Remove your reaction from a message
#[utoipa::path(
    delete,
    path = "/api/messages/{id}/reactions",
    tag = "reactions",
    params(
        ("id" = i64, Path, description = "Message ID"),
        RemoveReactionQuery
    ),
    responses(
        (status = 200, description = "Reaction summary after the change", body = Vec<ReactionSummary>),
        (status = 404, description = "Message or reaction not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn remove_reaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
    Query(query): Query<RemoveReactionQuery>,
) -> Result<impl IntoResponse> {
    query.validate()?;

    let summary = state
        .reaction_service
        .remove(message_id, user_id, &query.emoji)
        .await?;

    Ok(Json(summary))
}

/// List reactions on a message
#[utoipa::path(
    get,
    path = "/api/messages/{id}/reactions",
    tag = "reactions",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Reactions grouped by emoji", body = Vec<ReactionSummary>),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_reactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let summary = state.reaction_service.list(message_id, user_id).await?;
    Ok(Json(summary))
}

/// Per-recipient delivery status of a message
#[utoipa::path(
    get,
    path = "/api/messages/{id}/delivery",
    tag = "reactions",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Delivery rows, one per recipient", body = Vec<DeliveryStatus>),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delivery_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let rows = state
        .reaction_service
        .delivery_status(message_id, user_id)
        .await?;
    Ok(Json(rows))
}
