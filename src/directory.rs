//! Read-only views onto the host marketplace: who a user is and what an
//! article is. The messaging engine never writes these tables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use utoipa::ToSchema;

use crate::{cache::Cache, error::Result};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserContact {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ArticleSummary {
    pub id: i64,
    pub seller_id: i64,
    pub title: String,
    pub price: Option<f64>,
    pub status: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contact(&self, user_id: i64) -> Result<Option<UserContact>>;
}

#[async_trait]
pub trait ArticleDirectory: Send + Sync {
    async fn summary(&self, article_id: i64) -> Result<Option<ArticleSummary>>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn contact(&self, user_id: i64) -> Result<Option<UserContact>> {
        let contact = sqlx::query_as::<_, UserContact>(
            "SELECT id, username, email FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contact)
    }
}

/// Article lookups are hot (every conversation row and every email needs a
/// title) and change rarely, so they are served through the cache.
#[derive(Clone)]
pub struct PgArticleDirectory {
    pool: PgPool,
    cache: Cache,
    ttl: Duration,
}

impl PgArticleDirectory {
    pub fn new(pool: PgPool, cache: Cache, ttl: Duration) -> Self {
        Self { pool, cache, ttl }
    }

    fn cache_key(article_id: i64) -> String {
        format!("article:{}", article_id)
    }
}

#[async_trait]
impl ArticleDirectory for PgArticleDirectory {
    async fn summary(&self, article_id: i64) -> Result<Option<ArticleSummary>> {
        let key = Self::cache_key(article_id);

        match self.cache.get_json::<ArticleSummary>(&key).await {
            Ok(Some(summary)) => return Ok(Some(summary)),
            Ok(None) => {}
            Err(e) => tracing::warn!("Article cache read failed for {}: {}", article_id, e),
        }

        let summary = sqlx::query_as::<_, ArticleSummary>(
            "SELECT id, seller_id, title, price::FLOAT8 AS price, status FROM articles WHERE id = $1",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref summary) = summary {
            if let Err(e) = self.cache.set_json(&key, summary, self.ttl).await {
                tracing::warn!("Article cache write failed for {}: {}", article_id, e);
            }
        }

        Ok(summary)
    }
}
