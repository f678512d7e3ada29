//! Notification dispatch
//!
//! Fans captured DTMF out to every active webhook the campaign owner has
//! registered. Deliveries run concurrently and independently; one failing
//! webhook never blocks or fails the others, and only successful
//! deliveries advance `last_fired_at`.

pub mod discord;
pub mod telegram;

pub use discord::DiscordSender;
pub use telegram::TelegramSender;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Supported notification consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookProvider {
    Discord,
    Telegram,
}

/// Provider-specific webhook configuration, parsed into a closed variant
/// at the registration boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum WebhookConfig {
    Discord { webhook_url: String },
    Telegram { bot_token: String, chat_id: String },
}

impl WebhookConfig {
    pub fn provider(&self) -> WebhookProvider {
        match self {
            Self::Discord { .. } => WebhookProvider::Discord,
            Self::Telegram { .. } => WebhookProvider::Telegram,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Discord { webhook_url } if webhook_url.trim().is_empty() => Err(
                Error::InvalidRequest("discord webhook_url must not be empty".into()),
            ),
            Self::Telegram { bot_token, chat_id }
                if bot_token.trim().is_empty() || chat_id.trim().is_empty() =>
            {
                Err(Error::InvalidRequest(
                    "telegram bot_token and chat_id must not be empty".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// A registered notification webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationWebhook {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub config: WebhookConfig,
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// DTMF capture event rendered for notification consumers
#[derive(Debug, Clone, Serialize)]
pub struct DtmfNotification {
    pub digits: String,
    pub caller_id: String,
    pub dialed_number: String,
    pub source_line: Option<String>,
}

impl DtmfNotification {
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "DTMF [{}] from {} (caller id {})",
            self.digits, self.dialed_number, self.caller_id
        );
        if let Some(line) = &self.source_line {
            text.push('\n');
            text.push_str(line);
        }
        text
    }
}

/// Delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Config mismatch: {0}")]
    ConfigMismatch(String),
}

/// Seam to one notification provider's delivery API
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn deliver(
        &self,
        config: &WebhookConfig,
        text: &str,
    ) -> std::result::Result<(), NotifyError>;
}

/// Outcome of one webhook delivery within a fan-out
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub webhook_id: Uuid,
    pub provider: WebhookProvider,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregate fan-out result
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    webhooks: Arc<DashMap<Uuid, NotificationWebhook>>,
    senders: Arc<HashMap<WebhookProvider, Arc<dyn WebhookSender>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        let mut senders: HashMap<WebhookProvider, Arc<dyn WebhookSender>> = HashMap::new();
        senders.insert(WebhookProvider::Discord, Arc::new(DiscordSender::new()));
        senders.insert(WebhookProvider::Telegram, Arc::new(TelegramSender::new()));
        Self::with_senders(senders)
    }

    /// Build a dispatcher over explicit senders.
    pub fn with_senders(senders: HashMap<WebhookProvider, Arc<dyn WebhookSender>>) -> Self {
        Self {
            webhooks: Arc::new(DashMap::new()),
            senders: Arc::new(senders),
        }
    }

    pub fn register(&self, user_id: Uuid, config: WebhookConfig) -> Result<NotificationWebhook> {
        config.validate()?;
        let webhook = NotificationWebhook {
            id: Uuid::new_v4(),
            user_id,
            config,
            active: true,
            last_fired_at: None,
            created_at: Utc::now(),
        };
        self.webhooks.insert(webhook.id, webhook.clone());
        info!(webhook_id = %webhook.id, user_id = %user_id, provider = ?webhook.config.provider(), "Webhook registered");
        Ok(webhook)
    }

    pub fn remove(&self, webhook_id: Uuid) -> Result<NotificationWebhook> {
        self.webhooks
            .remove(&webhook_id)
            .map(|(_, hook)| hook)
            .ok_or(Error::WebhookNotFound(webhook_id))
    }

    pub fn list_for(&self, user_id: Uuid) -> Vec<NotificationWebhook> {
        self.webhooks
            .iter()
            .filter(|h| h.user_id == user_id)
            .map(|h| h.clone())
            .collect()
    }

    /// Fan a notification out to all of the user's active webhooks.
    /// Best effort: per-delivery outcomes are collected, never raised.
    pub async fn dispatch(&self, user_id: Uuid, notification: &DtmfNotification) -> DispatchReport {
        let targets: Vec<NotificationWebhook> = self
            .webhooks
            .iter()
            .filter(|h| h.user_id == user_id && h.active)
            .map(|h| h.clone())
            .collect();

        if targets.is_empty() {
            return DispatchReport::default();
        }

        let text = notification.render_text();
        let deliveries = targets.iter().map(|hook| {
            let sender = self.senders.get(&hook.config.provider()).cloned();
            let config = hook.config.clone();
            let text = text.clone();
            async move {
                match sender {
                    Some(sender) => sender.deliver(&config, &text).await,
                    None => Err(NotifyError::ConfigMismatch(format!(
                        "no sender for provider {:?}",
                        config.provider()
                    ))),
                }
            }
        });

        let results = join_all(deliveries).await;

        let mut report = DispatchReport {
            attempted: targets.len(),
            ..Default::default()
        };
        let now = Utc::now();
        for (hook, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    if let Some(mut stored) = self.webhooks.get_mut(&hook.id) {
                        stored.last_fired_at = Some(now);
                    }
                    report.succeeded += 1;
                    report.outcomes.push(DeliveryOutcome {
                        webhook_id: hook.id,
                        provider: hook.config.provider(),
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        webhook_id = %hook.id,
                        provider = ?hook.config.provider(),
                        error = %e,
                        "Webhook delivery failed"
                    );
                    report.outcomes.push(DeliveryOutcome {
                        webhook_id: hook.id,
                        provider: hook.config.provider(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            user_id = %user_id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            "Notification fan-out finished"
        );
        report
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSender {
        calls: AtomicUsize,
        fail: bool,
    }

    impl MockSender {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl WebhookSender for MockSender {
        async fn deliver(
            &self,
            _config: &WebhookConfig,
            _text: &str,
        ) -> std::result::Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Provider {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn notification() -> DtmfNotification {
        DtmfNotification {
            digits: "12".to_string(),
            caller_id: "+15550100".to_string(),
            dialed_number: "+14155550187".to_string(),
            source_line: Some("Jane Doe, +14155550187, renewal".to_string()),
        }
    }

    fn dispatcher(
        discord: Arc<MockSender>,
        telegram: Arc<MockSender>,
    ) -> NotificationDispatcher {
        let mut senders: HashMap<WebhookProvider, Arc<dyn WebhookSender>> = HashMap::new();
        senders.insert(WebhookProvider::Discord, discord);
        senders.insert(WebhookProvider::Telegram, telegram);
        NotificationDispatcher::with_senders(senders)
    }

    #[tokio::test]
    async fn partial_failure_only_advances_successful_hooks() {
        let discord = MockSender::new(false);
        let telegram = MockSender::new(true);
        let dispatcher = dispatcher(discord.clone(), telegram.clone());

        let user = Uuid::new_v4();
        let ok_hook = dispatcher
            .register(
                user,
                WebhookConfig::Discord {
                    webhook_url: "https://discord.example/webhook".to_string(),
                },
            )
            .unwrap();
        let bad_hook = dispatcher
            .register(
                user,
                WebhookConfig::Telegram {
                    bot_token: "token".to_string(),
                    chat_id: "42".to_string(),
                },
            )
            .unwrap();

        let report = dispatcher.dispatch(user, &notification()).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(discord.calls.load(Ordering::SeqCst), 1);
        assert_eq!(telegram.calls.load(Ordering::SeqCst), 1);

        let hooks = dispatcher.list_for(user);
        let ok = hooks.iter().find(|h| h.id == ok_hook.id).unwrap();
        let bad = hooks.iter().find(|h| h.id == bad_hook.id).unwrap();
        assert!(ok.last_fired_at.is_some());
        assert!(bad.last_fired_at.is_none());
    }

    #[tokio::test]
    async fn inactive_and_foreign_hooks_are_skipped() {
        let discord = MockSender::new(false);
        let telegram = MockSender::new(false);
        let dispatcher = dispatcher(discord.clone(), telegram);

        let user = Uuid::new_v4();
        let other_user = Uuid::new_v4();
        dispatcher
            .register(
                other_user,
                WebhookConfig::Discord {
                    webhook_url: "https://discord.example/webhook".to_string(),
                },
            )
            .unwrap();

        let report = dispatcher.dispatch(user, &notification()).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(discord.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_validates_config() {
        let dispatcher = NotificationDispatcher::new();
        let user = Uuid::new_v4();
        assert!(dispatcher
            .register(
                user,
                WebhookConfig::Discord {
                    webhook_url: "  ".to_string()
                }
            )
            .is_err());
        assert!(dispatcher
            .register(
                user,
                WebhookConfig::Telegram {
                    bot_token: String::new(),
                    chat_id: "42".to_string()
                }
            )
            .is_err());
    }

    #[test]
    fn notification_text_includes_lead_context() {
        let text = notification().render_text();
        assert!(text.contains("DTMF [12]"));
        assert!(text.contains("+14155550187"));
        assert!(text.contains("Jane Doe"));
    }
}
