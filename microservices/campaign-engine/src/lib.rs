//! Campaign Engine
//!
//! Outbound call-campaign dialing engine:
//! - Admission-gated per-campaign dispatch loops over SIP route projections
//! - REST origination against the telephony signaling provider
//! - Per-attempt call state tracking with DTMF capture and voicemail retry
//! - Prepaid ledger with per-call settlement and idempotent top-up crediting
//! - Best-effort webhook notification fan-out on captured DTMF

pub mod bridge;
pub mod calls;
pub mod campaigns;
pub mod config;
pub mod dialer;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod routes;
pub mod routes_store;
pub mod topup;

use std::sync::Arc;

use bridge::{BridgeClient, Originator};
use calls::CallRegistry;
use campaigns::CampaignStore;
use dialer::admission::AdmissionController;
use dialer::DialerRegistry;
use ledger::LedgerService;
use notify::NotificationDispatcher;
use routes_store::RouteStore;
use topup::TopUpService;

pub use config::Config;
pub use error::{Error, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub campaigns: CampaignStore,
    pub routes: RouteStore,
    pub ledger: LedgerService,
    pub topups: TopUpService,
    pub calls: CallRegistry,
    pub notifier: NotificationDispatcher,
    pub dialer: DialerRegistry,
    pub bridge: Option<Arc<BridgeClient>>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire every component over a shared ledger and campaign store. The
    /// originator is injected so tests can substitute an in-process fake.
    pub fn new(config: Config, originator: Arc<dyn Originator>) -> Self {
        let config = Arc::new(config);
        let ledger = LedgerService::new();
        let campaigns = CampaignStore::new();
        let routes = RouteStore::new();
        let notifier = NotificationDispatcher::new();
        let calls = CallRegistry::new(
            campaigns.clone(),
            routes.clone(),
            ledger.clone(),
            notifier.clone(),
            config.voicemail_retry_limit,
        );
        let admission = AdmissionController::new(
            ledger.clone(),
            config.max_active_channels,
            config.lead_rate_cents,
        );
        let dialer = DialerRegistry::new(
            campaigns.clone(),
            routes.clone(),
            admission,
            calls.clone(),
            originator,
            &config,
        );
        let bridge = BridgeClient::from_config(
            config.bridge_base_url.as_deref(),
            config.bridge_token.as_deref(),
        )
        .map(Arc::new);
        let topups = TopUpService::new(ledger.clone(), config.ipn_secret.clone());

        Self {
            campaigns,
            routes,
            ledger,
            topups,
            calls,
            notifier,
            dialer,
            bridge,
            config,
        }
    }
}
