//! Router configuration for the Campaign Engine API

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers;
use crate::AppState;

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // Ledger accounts
        .route("/api/v1/accounts", post(handlers::create_account))
        .route("/api/v1/accounts/{id}/balance", get(handlers::get_balance))
        .route(
            "/api/v1/accounts/{id}/adjustments",
            get(handlers::list_adjustments).post(handlers::create_adjustment),
        )
        // Route feed from the platform's route manager
        .route(
            "/api/v1/routes",
            put(handlers::upsert_route).get(handlers::list_routes),
        )
        .route("/api/v1/routes/{id}", delete(handlers::delete_route))
        // Campaigns
        .route(
            "/api/v1/campaigns",
            post(handlers::create_campaign).get(handlers::list_campaigns),
        )
        .route("/api/v1/campaigns/{id}", get(handlers::get_campaign))
        .route(
            "/api/v1/campaigns/{id}/leads",
            post(handlers::load_leads).get(handlers::campaign_leads),
        )
        .route(
            "/api/v1/campaigns/{id}/sessions",
            get(handlers::campaign_sessions),
        )
        .route("/api/v1/campaigns/{id}/start", post(handlers::start_campaign))
        .route("/api/v1/campaigns/{id}/stop", post(handlers::stop_campaign))
        // Live dashboards
        .route("/api/v1/calls/active", get(handlers::active_calls))
        // Notification webhooks
        .route(
            "/api/v1/webhooks",
            post(handlers::create_webhook).get(handlers::list_webhooks),
        )
        .route("/api/v1/webhooks/{id}", delete(handlers::delete_webhook))
        // Top-ups
        .route(
            "/api/v1/topups",
            post(handlers::create_topup).get(handlers::list_topups),
        )
        .route("/api/v1/topups/ipn", post(handlers::ipn_callback))
        .route("/api/v1/topups/{order_id}", get(handlers::get_topup))
        // Signaling event ingress
        .route("/api/v1/bridge/events", post(handlers::bridge_event))
        .with_state(state)
}
