//! Campaign Engine microservice
//!
//! Outbound call-campaign dialing:
//! - Admission-gated per-campaign dispatch with global and per-route caps
//! - ARI-style origination against the telephony signaling provider
//! - Call lifecycle tracking, DTMF capture and voicemail retry
//! - Prepaid ledger settlement and idempotent top-up reconciliation
//! - Webhook notification fan-out

use ringflow_core::{
    DependencyStatus, HealthStatus, ReadinessStatus, Result, RingflowError, RingflowService,
    ServiceRuntime,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use campaign_engine::bridge::AriClient;
use campaign_engine::{routes, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    info!("Starting Campaign Engine");

    let config = Config::from_env().map_err(|e| RingflowError::Config(e.to_string()))?;
    let service = Arc::new(CampaignEngineService::new(config));
    ServiceRuntime::run(service).await
}

pub struct CampaignEngineService {
    state: AppState,
    start_time: std::time::Instant,
}

impl CampaignEngineService {
    pub fn new(config: Config) -> Self {
        let originator = Arc::new(AriClient::new(&config));
        Self {
            state: AppState::new(config, originator),
            start_time: std::time::Instant::now(),
        }
    }
}

#[async_trait::async_trait]
impl RingflowService for CampaignEngineService {
    fn service_id(&self) -> &'static str {
        "campaign-engine"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let signaling = !self.state.config.ari_base_url.is_empty();
        ReadinessStatus {
            ready: signaling,
            dependencies: vec![
                DependencyStatus {
                    name: "signaling-provider".to_string(),
                    available: signaling,
                    latency_ms: None,
                },
                // Soft dependency: absent is a valid configuration
                DependencyStatus {
                    name: "bridge-service".to_string(),
                    available: self.state.bridge.is_some(),
                    latency_ms: None,
                },
            ],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Campaign Engine");
        // Cooperative: every dispatch loop observes its stop flag before
        // pulling another lead
        self.state.dialer.stop_all();
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let bind_addr = self.state.config.bind_address();
        let app = routes::create_router(self.state.clone());

        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Campaign Engine listening on {}", bind_addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| RingflowError::Network(e.to_string()))?;

        Ok(())
    }
}
