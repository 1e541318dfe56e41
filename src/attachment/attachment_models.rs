use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Public prefix under which stored files are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Image,
    Document,
}

impl FileClass {
    /// Storage bucket relative to the upload root.
    pub fn bucket(self) -> &'static str {
        match self {
            FileClass::Image => "images",
            FileClass::Document => "files",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub original_name: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub thumbnail_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An upload as received, before validation.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A file that passed validation, with its class and canonical MIME type.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub class: FileClass,
    pub extension: String,
    pub mime_type: String,
    pub original_name: String,
    pub bytes: Vec<u8>,
}

/// Descriptor of files written to storage. Paths are relative to the
/// upload root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub class: FileClass,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub original_name: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttachmentResponse {
    pub id: i64,
    pub message_id: i64,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub file_size: i64,
    pub mime_type: String,
    pub original_name: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl From<Attachment> for AttachmentResponse {
    fn from(attachment: Attachment) -> Self {
        Self {
            id: attachment.id,
            message_id: attachment.message_id,
            url: format!("{}/{}", UPLOADS_URL_PREFIX, attachment.file_path),
            thumbnail_url: attachment
                .thumbnail_path
                .map(|p| format!("{}/{}", UPLOADS_URL_PREFIX, p)),
            file_size: attachment.file_size,
            mime_type: attachment.mime_type,
            original_name: attachment.original_name,
            width: attachment.width,
            height: attachment.height,
        }
    }
}
