use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ChannelOutcome, NotificationChannel};
use crate::{
    error::{AppError, Result},
    message::sanitize::escape,
    notification::notification_models::{ChannelKind, OutboundNotification},
};

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub app_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// SMTP delivery. With an empty host the channel runs in no-op mode and only
/// logs what it would have sent.
#[derive(Clone)]
pub struct EmailChannel {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    app_base_url: String,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Result<Self> {
        let from = settings
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Email(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if settings.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email notifications will operate in no-op mode");
            None
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
                .map_err(|e| AppError::Email(format!("Failed to configure SMTP transport: {}", e)))?
                .port(settings.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&settings.smtp_username, &settings.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            app_base_url: settings.app_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn unsubscribe_link(&self) -> String {
        format!("{}/settings/notifications?unsubscribe=email", self.app_base_url)
    }

    pub fn render(&self, notification: &OutboundNotification) -> RenderedEmail {
        let greeting = match &notification.recipient_name {
            Some(name) => format!("Hi {},", name),
            None => "Hi,".to_string(),
        };
        let unsubscribe = self.unsubscribe_link();
        let link = notification.link.as_deref();

        let mut text = format!("{}\n\n{}\n\n\"{}\"\n", greeting, notification.title, notification.preview);
        if let Some(link) = link {
            text.push_str(&format!("\nReply here: {}\n", link));
        }
        text.push_str(&format!(
            "\nYou are receiving this because email notifications are enabled.\n\
             Unsubscribe: {}\n",
            unsubscribe
        ));

        let button = link
            .map(|l| {
                format!(
                    r#"<p style="margin: 24px 0;"><a href="{}" style="background-color: #000; color: #fff; padding: 12px 24px; text-decoration: none; border-radius: 20px;">Reply</a></p>"#,
                    escape(l)
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
    <p>{greeting}</p>
    <h3>{title}</h3>
    <blockquote style="border-left: 3px solid #ddd; margin: 0; padding-left: 12px; color: #555;">{preview}</blockquote>
    {button}
    <p style="color: #999; font-size: 12px; margin-top: 30px;">
        You are receiving this because email notifications are enabled.<br>
        <a href="{unsubscribe}" style="color: #999;">Unsubscribe</a>
    </p>
</body>
</html>"#,
            greeting = escape(&greeting),
            title = escape(&notification.title),
            preview = escape(&notification.preview),
            button = button,
            unsubscribe = escape(&unsubscribe),
        );

        RenderedEmail {
            subject: notification.title.clone(),
            text,
            html,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn deliver(&self, notification: &OutboundNotification) -> Result<ChannelOutcome> {
        let Some(recipient) = notification.email.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(ChannelOutcome::Skipped("recipient has no email address"));
        };

        let rendered = self.render(notification);

        let Some(transport) = &self.transport else {
            info!(
                user_id = notification.user_id,
                subject = %rendered.subject,
                "Email channel running in no-op mode; skipping actual send"
            );
            return Ok(ChannelOutcome::Skipped("smtp not configured"));
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::Email(format!("Invalid recipient email address: {}", e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject.clone())
            .multipart(MultiPart::alternative_plain_html(rendered.text, rendered.html))
            .map_err(|e| AppError::Email(format!("Failed to build email message: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        debug!(user_id = notification.user_id, "notification email sent");
        Ok(ChannelOutcome::Delivered)
    }
}
