//! Reminder delivery channels.

use async_trait::async_trait;
use serde_json::json;

use super::NotificationChannel;
use crate::error::ProviderError;

/// Posts `{recipient, subject, body}` as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&json!({
                "recipient": recipient,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::unavailable("webhook", e))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), recipient, "Webhook rejected reminder");
        }
        Ok(status.is_success())
    }
}

/// Writes reminders to the tracing log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<bool, ProviderError> {
        tracing::info!(recipient, subject, body, "Reminder");
        Ok(true)
    }
}
