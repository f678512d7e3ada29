//! Error types for Campaign Engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::bridge::ProviderError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Campaign Engine error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(uuid::Uuid),

    #[error("Account not found: {0}")]
    AccountNotFound(uuid::Uuid),

    #[error("Route not found: {0}")]
    RouteNotFound(uuid::Uuid),

    #[error("Webhook not found: {0}")]
    WebhookNotFound(uuid::Uuid),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Campaign already running: {0}")]
    AlreadyRunning(uuid::Uuid),

    #[error("No dialable leads available")]
    NoLeadsAvailable,

    #[error("Insufficient balance: {required_cents} cents required, {shortfall_cents} short")]
    InsufficientBalance {
        required_cents: i64,
        shortfall_cents: i64,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::CampaignNotFound(_)
            | Error::AccountNotFound(_)
            | Error::RouteNotFound(_)
            | Error::WebhookNotFound(_)
            | Error::InvoiceNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            Error::AlreadyRunning(_)
            | Error::NoLeadsAvailable
            | Error::InsufficientBalance { .. } => (StatusCode::CONFLICT, self.to_string()),
            Error::Provider(_) | Error::Bridge(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            Error::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16()
        });
        if let Error::InsufficientBalance {
            required_cents,
            shortfall_cents,
        } = &self
        {
            body["required_cents"] = json!(required_cents);
            body["shortfall_cents"] = json!(shortfall_cents);
        }

        (status, Json(body)).into_response()
    }
}
