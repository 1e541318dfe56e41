use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::attachment_models::IncomingFile;
use crate::{
    error::{AppError, Result},
    middleware::AuthUser,
    state::AppState,
};

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Upload exceeds the maximum request size".to_string())
    } else {
        AppError::BadRequest(format!("Malformed upload: {}", e.body_text()))
    }
}

/// Upload an image or document as a new message
///
/// Multipart fields: `file` (required) and `caption` (optional text).
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/attachments",
    tag = "attachments",
    params(("id" = i64, Path, description = "Conversation ID")),
    request_body(content = String, content_type = "multipart/form-data", description = "`file` plus optional `caption`"),
    responses(
        (status = 201, description = "Attachment stored and message created", body = crate::message::message_models::MessageResponse),
        (status = 400, description = "Missing or empty file"),
        (status = 403, description = "Not a participant, or the conversation is blocked"),
        (status = 413, description = "File too large for its type"),
        (status = 415, description = "File type not allowed or content mismatch")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn upload_attachment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut file: Option<IncomingFile> = None;
    let mut caption: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("File name is required".to_string()))?;
                let declared_mime = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some(IncomingFile {
                    original_name,
                    declared_mime,
                    bytes: bytes.to_vec(),
                });
            }
            Some("caption") => {
                caption = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("A file field is required".to_string()))?;

    let message = state
        .attachment_service
        .upload(conversation_id, user_id, file, caption)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Delete an attachment and its stored files
#[utoipa::path(
    delete,
    path = "/api/attachments/{id}",
    tag = "attachments",
    params(("id" = i64, Path, description = "Attachment ID")),
    responses(
        (status = 204, description = "Attachment deleted"),
        (status = 403, description = "Not the sender or a participant"),
        (status = 404, description = "Attachment not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_attachment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(attachment_id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.attachment_service.delete(attachment_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
