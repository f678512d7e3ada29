//! Discord webhook sender

use async_trait::async_trait;
use serde_json::json;

use super::{NotifyError, WebhookConfig, WebhookSender};

pub struct DiscordSender {
    http_client: reqwest::Client,
}

impl DiscordSender {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for DiscordSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for DiscordSender {
    async fn deliver(
        &self,
        config: &WebhookConfig,
        text: &str,
    ) -> std::result::Result<(), NotifyError> {
        let WebhookConfig::Discord { webhook_url } = config else {
            return Err(NotifyError::ConfigMismatch(
                "discord sender given non-discord config".to_string(),
            ));
        };

        let payload = json!({ "content": text });

        let response = self
            .http_client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Provider { status, body })
        }
    }
}
