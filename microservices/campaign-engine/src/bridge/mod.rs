//! Telephony bridge adapters
//!
//! The engine talks to two external telephony surfaces:
//! - the signaling provider's REST API for call origination (`AriClient`)
//! - the optional bridge service holding SIP trunk state (`BridgeClient`)

pub mod ari;
pub mod trunks;

pub use ari::AriClient;
pub use trunks::BridgeClient;

use async_trait::async_trait;

use crate::model::SipRoute;

/// Result of origination attempts
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from the signaling provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl ProviderError {
    /// Transport failures and provider 5xx responses are worth a bounded
    /// requeue; 4xx responses are terminal for the lead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

/// Everything one origination needs
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    pub route: SipRoute,
    pub dial_number: String,
    pub caller_id: String,
    pub timeout_secs: Option<u32>,
    /// Channel variables passed as repeated `variables=k=v` parameters
    pub variables: Vec<(String, String)>,
    /// Stasis application arguments, joined comma-separated
    pub app_args: Vec<String>,
}

/// Handle to a successfully originated channel
#[derive(Debug, Clone)]
pub struct Origination {
    pub channel_id: String,
}

/// Seam to the signaling provider's origination API
#[async_trait]
pub trait Originator: Send + Sync {
    async fn originate(&self, request: &OriginateRequest) -> ProviderResult<Origination>;
}
