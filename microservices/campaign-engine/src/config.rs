//! Configuration for Campaign Engine microservice

use std::net::SocketAddr;

/// Campaign Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Signaling provider REST base URL
    pub ari_base_url: String,
    /// Signaling provider basic-auth username
    pub ari_username: String,
    /// Signaling provider basic-auth password
    pub ari_password: String,
    /// Stasis application receiving originated channels
    pub ari_app: String,
    /// Default ring timeout in seconds (clamped to a 5s floor)
    pub ari_timeout_secs: u32,
    /// Global ceiling on simultaneously active channels
    pub max_active_channels: i64,
    /// Admission budget rate per dialable lead (cents)
    pub lead_rate_cents: i64,
    /// Minimum spacing between successive originations per campaign (ms)
    pub dial_interval_ms: u64,
    /// Dispatcher backoff when idle or denied admission (ms)
    pub idle_poll_ms: u64,
    /// Voicemail requeue cap per lead
    pub voicemail_retry_limit: u32,
    /// Origination attempt cap per lead
    pub max_dial_attempts: u32,
    /// Bridge service base URL (unset disables trunk mirroring)
    pub bridge_base_url: Option<String>,
    /// Bridge service bearer token
    pub bridge_token: Option<String>,
    /// HMAC secret for payment callback signatures (empty rejects callbacks)
    pub ipn_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8098".to_string())
                .parse()?,
            ari_base_url: std::env::var("ARI_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8088/ari".to_string()),
            ari_username: std::env::var("ARI_USERNAME")
                .unwrap_or_else(|_| "ringflow".to_string()),
            ari_password: std::env::var("ARI_PASSWORD").unwrap_or_default(),
            ari_app: std::env::var("ARI_APP").unwrap_or_else(|_| "ringflow-dialer".to_string()),
            ari_timeout_secs: std::env::var("ARI_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            max_active_channels: std::env::var("MAX_ACTIVE_CHANNELS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            lead_rate_cents: std::env::var("LEAD_RATE_CENTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            dial_interval_ms: std::env::var("DIAL_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            idle_poll_ms: std::env::var("IDLE_POLL_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()?,
            voicemail_retry_limit: std::env::var("VOICEMAIL_RETRY_LIMIT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            max_dial_attempts: std::env::var("MAX_DIAL_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            bridge_base_url: std::env::var("BRIDGE_BASE_URL").ok(),
            bridge_token: std::env::var("BRIDGE_TOKEN").ok(),
            ipn_secret: std::env::var("IPN_SECRET").unwrap_or_default(),
        })
    }

    /// Get socket address for binding
    pub fn bind_address(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid bind address")
    }
}
