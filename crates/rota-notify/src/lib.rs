//! rota-notify: notification sink implementations.
//!
//! [`WebhookSink`] posts messages as JSON to a configured URL;
//! [`LogSink`] is the default when no webhook is configured. Callers
//! swallow sink errors — delivery is best-effort by contract.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use rota_types::NotificationSink;

/// Posts `{ "text": message }` to a webhook endpoint.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .context("webhook request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned status {}", response.status());
        }
        Ok(())
    }
}

/// Writes notifications to the log. Never fails.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        info!("notification: {message}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        let sink = LogSink;
        sink.send("task 'x' completed").await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_sink_unreachable_errors() {
        // Nothing listens on this port; the send must surface an error the
        // caller can swallow.
        let sink = WebhookSink::new("http://127.0.0.1:1/hook");
        assert!(sink.send("hello").await.is_err());
    }
}
