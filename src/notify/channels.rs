//! Delivery channels.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Alert, NotificationChannel, NotifyError};

/// Writes alerts to the log.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::warn!(
            "Notify: {} (to {} email(s){})",
            alert.short_text(),
            alert.emails.len(),
            if alert.phone.is_some() { " and sms" } else { "" }
        );
        Ok(())
    }
}

/// POSTs the alert as JSON to a fixed URL.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(NotifyError::Delivery {
                channel: self.name().to_string(),
                message: format!("webhook returned {}: {}", status, body),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Target;
    use crate::notify::AlertKind;

    fn alert() -> Alert {
        let target = Target {
            id: 1,
            name: "example".to_string(),
            url: "https://example.com/".to_string(),
            ..Default::default()
        };
        Alert::new(&target, AlertKind::Recovered { downtime_seconds: 30 })
    }

    #[tokio::test]
    async fn test_log_channel_always_delivers() {
        assert!(LogChannel.deliver(&alert()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_network_error() {
        let channel =
            WebhookChannel::new("http://127.0.0.1:1/hook", Duration::from_millis(500)).unwrap();
        let err = channel.deliver(&alert()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Network(_)));
    }
}
