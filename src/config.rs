use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

use crate::{attachment::attachment_validation::SizeLimits, notification::channels::EmailSettings};

const MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,

    pub upload_dir: String,
    pub max_image_bytes: u64,
    pub max_file_bytes: u64,
    pub max_image_dimension: u32,
    pub thumbnail_dimension: u32,
    pub max_message_length: usize,

    pub typing_ttl_secs: i64,
    pub presence_ttl_secs: u64,
    pub stale_connection_secs: i64,
    pub heartbeat_interval_secs: u64,
    pub sse_keepalive_secs: u64,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub push_gateway_url: Option<String>,
    pub app_base_url: String,
    pub notification_batch_size: usize,
    pub notification_batch_pause_ms: u64,

    pub article_cache_ttl_secs: u64,
}

/// Reads settings through `lookup`, which returns the raw value of a variable.
struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .with_context(|| format!("{} must be set", name))
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{} has an invalid value: {}", name, raw)),
            None => Ok(default),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Source { lookup };
        let app_base_url = env
            .optional("APP_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let allowed_origins = match env.optional("ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![app_base_url.clone()],
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            jwt_secret: env.required("JWT_SECRET")?,
            redis_url: env.optional("REDIS_URL"),
            host: env.optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env.parsed("PORT", 3000)?,

            upload_dir: env.optional("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string()),
            max_image_bytes: env.parsed("MAX_IMAGE_BYTES", 5 * MIB)?,
            max_file_bytes: env.parsed("MAX_FILE_BYTES", 10 * MIB)?,
            max_image_dimension: env.parsed("MAX_IMAGE_DIMENSION", 2048)?,
            thumbnail_dimension: env.parsed("THUMBNAIL_DIMENSION", 300)?,
            max_message_length: env.parsed("MAX_MESSAGE_LENGTH", 5000)?,

            typing_ttl_secs: env.parsed("TYPING_TTL_SECS", 10)?,
            presence_ttl_secs: env.parsed("PRESENCE_TTL_SECS", 60)?,
            stale_connection_secs: env.parsed("STALE_CONNECTION_SECS", 90)?,
            heartbeat_interval_secs: env.parsed("HEARTBEAT_INTERVAL_SECS", 30)?,
            sse_keepalive_secs: env.parsed("SSE_KEEPALIVE_SECS", 15)?,

            smtp_host: env.optional("SMTP_HOST").unwrap_or_default(),
            smtp_port: env.parsed("SMTP_PORT", 587)?,
            smtp_username: env.optional("SMTP_USERNAME"),
            smtp_password: env.optional("SMTP_PASSWORD"),
            smtp_from: env.optional("SMTP_FROM").unwrap_or_else(|| "no-reply@localhost".to_string()),
            push_gateway_url: env.optional("PUSH_GATEWAY_URL"),
            app_base_url,
            allowed_origins,
            notification_batch_size: env.parsed("NOTIFICATION_BATCH_SIZE", 50)?,
            notification_batch_pause_ms: env.parsed("NOTIFICATION_BATCH_PAUSE_MS", 500)?,

            article_cache_ttl_secs: env.parsed("ARTICLE_CACHE_TTL_SECS", 300)?,
        })
    }

    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_image_bytes: self.max_image_bytes,
            max_file_bytes: self.max_file_bytes,
        }
    }

    /// Request body ceiling for uploads: the larger class limit plus room
    /// for multipart framing and the caption.
    pub fn upload_body_limit(&self) -> usize {
        (self.max_image_bytes.max(self.max_file_bytes) + 64 * 1024) as usize
    }

    pub fn email_settings(&self) -> EmailSettings {
        EmailSettings {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone(),
            smtp_password: self.smtp_password.clone(),
            smtp_from: self.smtp_from.clone(),
            app_base_url: self.app_base_url.clone(),
        }
    }

    pub fn typing_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.typing_ttl_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_connection_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs.max(1))
    }

    pub fn article_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.article_cache_ttl_secs)
    }

    pub fn notification_batch_pause(&self) -> Duration {
        Duration::from_millis(self.notification_batch_pause_ms)
    }
}
