use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use super::presence_models::PresenceStatus;
use crate::{error::Result, middleware::AuthUser, state::AppState};

/// Whether a user is currently connected, with a last-seen fallback
#[utoipa::path(
    get,
    path = "/api/presence/{user_id}",
    tag = "presence",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Presence of the user", body = PresenceStatus),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_presence(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let status = state.connection_registry.is_online(user_id).await?;
    Ok(Json(status))
}
