//! Telegram Bot API sender

use async_trait::async_trait;
use serde_json::json;

use super::{NotifyError, WebhookConfig, WebhookSender};

pub struct TelegramSender {
    http_client: reqwest::Client,
}

impl TelegramSender {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for TelegramSender {
    async fn deliver(
        &self,
        config: &WebhookConfig,
        text: &str,
    ) -> std::result::Result<(), NotifyError> {
        let WebhookConfig::Telegram { bot_token, chat_id } = config else {
            return Err(NotifyError::ConfigMismatch(
                "telegram sender given non-telegram config".to_string(),
            ));
        };

        let payload = json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .http_client
            .post(format!(
                "https://api.telegram.org/bot{}/sendMessage",
                bot_token
            ))
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
