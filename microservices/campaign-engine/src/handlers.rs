//! HTTP handlers for the Campaign Engine API

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calls::BridgeEvent;
use crate::campaigns::LeadBatchReport;
use crate::ledger::{Account, AdjustmentKind, AdjustmentSource, BalanceAdjustment};
use crate::model::{
    Campaign, CampaignLead, CampaignSummary, CallSession, RouteOverrides, SipRoute, TopUpInvoice,
};
use crate::notify::{NotificationWebhook, WebhookConfig};
use crate::topup::IpnUpdate;
use crate::{AppState, Error, Result};

/// Signature header on payment provider callbacks
const IPN_SIGNATURE_HEADER: &str = "x-nowpayments-sig";

fn default_history_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Ready check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub signaling_provider: bool,
    pub bridge_configured: bool,
    pub running_campaigns: usize,
}

// ============================================
// Health Handlers
// ============================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "campaign-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let signaling_provider = !state.config.ari_base_url.is_empty();
    Json(ReadyResponse {
        ready: signaling_provider,
        signaling_provider,
        bridge_configured: state.bridge.is_some(),
        running_campaigns: state.dialer.running_count(),
    })
}

// ============================================
// Ledger Account Handlers
// ============================================

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub initial_cents: i64,
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>)> {
    if req.initial_cents < 0 {
        return Err(Error::InvalidRequest(
            "initial balance must not be negative".to_string(),
        ));
    }
    let account = state.ledger.open_account(req.user_id, req.initial_cents)?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance_cents: i64,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>> {
    let balance_cents = state.ledger.balance(id)?;
    Ok(Json(BalanceResponse {
        user_id: id,
        balance_cents,
    }))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

pub async fn list_adjustments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<BalanceAdjustment>>> {
    state.ledger.balance(id)?;
    Ok(Json(state.ledger.adjustments(id, query.limit)))
}

#[derive(Deserialize)]
pub struct AdjustmentRequest {
    pub kind: AdjustmentKind,
    pub amount_cents: i64,
    pub reason: String,
}

/// Manual credit or debit, recorded with the ADMIN source tag.
pub async fn create_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustmentRequest>,
) -> Result<Json<BalanceResponse>> {
    let balance_cents = match req.kind {
        AdjustmentKind::Credit => state.ledger.credit(
            id,
            req.amount_cents,
            AdjustmentSource::Admin,
            &req.reason,
            None,
        )?,
        AdjustmentKind::Debit => state.ledger.debit(
            id,
            req.amount_cents,
            AdjustmentSource::Admin,
            &req.reason,
            None,
        )?,
    };
    Ok(Json(BalanceResponse {
        user_id: id,
        balance_cents,
    }))
}

// ============================================
// Route Feed Handlers
// ============================================

/// Route projection fed by the platform's route manager. Free-form
/// metadata is parsed into typed overrides here, at the boundary.
#[derive(Deserialize)]
pub struct RouteProjection {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub outbound_uri: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub rate_cents_per_min: i64,
    pub max_channels: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub async fn upsert_route(
    State(state): State<AppState>,
    Json(req): Json<RouteProjection>,
) -> Result<Json<SipRoute>> {
    if req.rate_cents_per_min < 0 || req.max_channels < 1 {
        return Err(Error::InvalidRequest(
            "rate must be non-negative and max_channels at least 1".to_string(),
        ));
    }

    let now = Utc::now();
    let route = state.routes.upsert(SipRoute {
        id: req.id,
        name: req.name,
        domain: req.domain,
        outbound_uri: req.outbound_uri,
        username: req.username,
        password: req.password,
        rate_cents_per_min: req.rate_cents_per_min,
        max_channels: req.max_channels,
        active: req.active,
        overrides: RouteOverrides::from_metadata(&req.metadata),
        created_at: now,
        updated_at: now,
    });

    // Mirroring is best effort; the feed must not depend on the bridge
    if let Some(bridge) = &state.bridge {
        if let Err(e) = bridge.push_trunk(&route).await {
            tracing::warn!(route_id = %route.id, error = %e, "Trunk mirror failed");
        }
    }

    Ok(Json(route))
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.routes.remove(id).ok_or(Error::RouteNotFound(id))?;

    if let Some(bridge) = &state.bridge {
        if let Err(e) = bridge.remove_trunk(id).await {
            tracing::warn!(route_id = %id, error = %e, "Trunk removal mirror failed");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_routes(State(state): State<AppState>) -> Json<Vec<SipRoute>> {
    Json(state.routes.list())
}

// ============================================
// Campaign Handlers
// ============================================

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub user_id: Uuid,
    pub name: String,
    pub caller_id: String,
    pub route_id: Uuid,
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>)> {
    if req.caller_id.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "caller_id must not be empty".to_string(),
        ));
    }
    if state.routes.get(req.route_id).is_none() {
        return Err(Error::RouteNotFound(req.route_id));
    }

    let campaign =
        state
            .campaigns
            .create_campaign(req.user_id, req.name, req.caller_id, req.route_id);
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[derive(Deserialize)]
pub struct LoadLeadsRequest {
    pub lines: Vec<String>,
}

pub async fn load_leads(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LoadLeadsRequest>,
) -> Result<(StatusCode, Json<LeadBatchReport>)> {
    if req.lines.is_empty() {
        return Err(Error::InvalidRequest("no lead lines given".to_string()));
    }
    let report = state.campaigns.load_leads(id, &req.lines)?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.dialer.start(id)?))
}

pub async fn stop_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.dialer.stop(id)?))
}

fn summarize(state: &AppState, campaign: Campaign) -> CampaignSummary {
    let lead_counts = state.campaigns.lead_counts(campaign.id);
    let active_calls = state.calls.active_count_for(campaign.id);
    CampaignSummary {
        campaign,
        lead_counts,
        active_calls,
    }
}

pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<CampaignSummary>> {
    let summaries = state
        .campaigns
        .list()
        .into_iter()
        .map(|c| summarize(&state, c))
        .collect();
    Json(summaries)
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignSummary>> {
    let campaign = state.campaigns.get(id).ok_or(Error::CampaignNotFound(id))?;
    Ok(Json(summarize(&state, campaign)))
}

pub async fn campaign_leads(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CampaignLead>>> {
    state.campaigns.get(id).ok_or(Error::CampaignNotFound(id))?;
    Ok(Json(state.campaigns.leads_for(id)))
}

pub async fn campaign_sessions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CallSession>>> {
    state.campaigns.get(id).ok_or(Error::CampaignNotFound(id))?;
    Ok(Json(state.calls.sessions_for_campaign(id)))
}

pub async fn active_calls(State(state): State<AppState>) -> Json<Vec<CallSession>> {
    Json(state.calls.active_sessions())
}

// ============================================
// Notification Webhook Handlers
// ============================================

#[derive(Deserialize)]
pub struct RegisterWebhookRequest {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub config: WebhookConfig,
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<(StatusCode, Json<NotificationWebhook>)> {
    let webhook = state.notifier.register(req.user_id, req.config)?;
    Ok((StatusCode::CREATED, Json(webhook)))
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    pub user_id: Uuid,
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
) -> Json<Vec<NotificationWebhook>> {
    Json(state.notifier.list_for(query.user_id))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.notifier.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Top-Up Handlers
// ============================================

#[derive(Deserialize)]
pub struct CreateTopUpRequest {
    pub user_id: Uuid,
    pub order_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub pay_currency: Option<String>,
}

pub async fn create_topup(
    State(state): State<AppState>,
    Json(req): Json<CreateTopUpRequest>,
) -> Result<(StatusCode, Json<TopUpInvoice>)> {
    let invoice = state.topups.create_invoice(
        req.user_id,
        &req.order_id,
        req.amount_cents,
        req.pay_currency,
    )?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

#[derive(Deserialize)]
pub struct TopUpQuery {
    pub user_id: Uuid,
}

pub async fn list_topups(
    State(state): State<AppState>,
    Query(query): Query<TopUpQuery>,
) -> Json<Vec<TopUpInvoice>> {
    Json(state.topups.invoices_for(query.user_id))
}

pub async fn get_topup(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<TopUpInvoice>> {
    let invoice = state
        .topups
        .invoice(&order_id)
        .ok_or(Error::InvoiceNotFound(order_id))?;
    Ok(Json(invoice))
}

/// Signed payment callback. The signature covers the raw body, so it is
/// verified before any parsing; an invalid one has no side effects.
pub async fn ipn_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let signature = headers
        .get(IPN_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("missing callback signature".to_string()))?;

    if !state.topups.verify_signature(&body, signature) {
        return Err(Error::Unauthorized(
            "invalid callback signature".to_string(),
        ));
    }

    let update: IpnUpdate = serde_json::from_slice(&body)
        .map_err(|e| Error::InvalidRequest(format!("malformed callback: {}", e)))?;
    let outcome = state.topups.apply_update(&update)?;
    Ok(Json(serde_json::json!({ "outcome": outcome })))
}

// ============================================
// Signaling Event Ingress
// ============================================

/// Inbound event stream from the telephony bridge. Events for unknown
/// channels are dropped inside the registry.
pub async fn bridge_event(
    State(state): State<AppState>,
    Json(event): Json<BridgeEvent>,
) -> StatusCode {
    state.calls.apply(event);
    StatusCode::ACCEPTED
}
