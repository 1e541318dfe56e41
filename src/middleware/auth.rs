use crate::{auth::verify_jwt, error::AppError, state::AppState};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};

/// Resolves the caller identity from a bearer token. WebSocket and SSE clients
/// that cannot set headers pass it as `?token=`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = if let Some(auth_header) = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
    {
        auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("Invalid credentials".to_string()))?
            .to_string()
    } else {
        let query = req.uri().query().unwrap_or("");
        query
            .split('&')
            .find_map(|p| p.strip_prefix("token="))
            .map(str::to_string)
            .ok_or(AppError::Unauthorized("Invalid credentials".to_string()))?
    };

    let claims = verify_jwt(&token, &state.config.jwt_secret)?;
    let user_id = claims.user_id()?;

    req.extensions_mut().insert(CallerId(user_id));

    Ok(next.run(req).await)
}

#[derive(Debug, Clone, Copy)]
struct CallerId(i64);

/// Extractor for the authenticated caller.
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerId>()
            .map(|caller| AuthUser(caller.0))
            .ok_or(AppError::Unauthorized("Invalid credentials".to_string()))
    }
}
