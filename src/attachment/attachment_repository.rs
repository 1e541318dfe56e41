use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::attachment_models::{Attachment, StoredFile};
use crate::error::Result;

/// An attachment with what is needed to authorize its deletion.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentOwnership {
    #[sqlx(flatten)]
    pub attachment: Attachment,
    pub sender_id: i64,
    pub conversation_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
}

pub async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    message_id: i64,
    stored: &StoredFile,
) -> Result<Attachment> {
    let attachment = sqlx::query_as::<_, Attachment>(
        "INSERT INTO message_attachments
            (message_id, file_path, file_size, mime_type, original_name, width, height, thumbnail_path)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(message_id)
    .bind(&stored.file_path)
    .bind(stored.file_size)
    .bind(&stored.mime_type)
    .bind(&stored.original_name)
    .bind(stored.width)
    .bind(stored.height)
    .bind(&stored.thumbnail_path)
    .fetch_one(&mut **tx)
    .await?;

    Ok(attachment)
}

#[derive(Clone)]
pub struct AttachmentRepository {
    pool: PgPool,
}

impl AttachmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_with_ownership(&self, attachment_id: i64) -> Result<Option<AttachmentOwnership>> {
        let row = sqlx::query_as::<_, AttachmentOwnership>(
            "SELECT a.*, m.sender_id, m.conversation_id, c.buyer_id, c.seller_id
             FROM message_attachments a
             JOIN messages m ON m.id = a.message_id
             JOIN conversations c ON c.id = m.conversation_id
             WHERE a.id = $1",
        )
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn for_messages(&self, message_ids: &[i64]) -> Result<Vec<Attachment>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let attachments = sqlx::query_as::<_, Attachment>(
            "SELECT * FROM message_attachments WHERE message_id = ANY($1) ORDER BY id",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(attachments)
    }

    pub async fn delete(&self, attachment_id: i64) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM message_attachments WHERE id = $1")
            .bind(attachment_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }
}
