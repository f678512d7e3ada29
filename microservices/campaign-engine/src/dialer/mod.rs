//! Campaign dispatch
//!
//! One spawned runner task per running campaign, supervised by a registry
//! keyed by campaign id. Each loop claims the oldest queued lead, asks the
//! admission controller for channel capacity and budget headroom, then
//! hands origination to its own task so a slow provider call never stalls
//! the loop. Stop is cooperative: the flag is observed before every claim
//! and in-flight calls are left to finish naturally.

pub mod admission;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{OriginateRequest, Originator};
use crate::calls::CallRegistry;
use crate::campaigns::CampaignStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Campaign, CampaignLead, CampaignStatus, SipRoute};
use crate::routes_store::RouteStore;

use admission::{AdmissionController, CallPermit};

/// Cooperative stop flag for one running campaign
struct RunnerHandle {
    stop: AtomicBool,
}

/// Supervisor for per-campaign dispatch loops
#[derive(Clone)]
pub struct DialerRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    campaigns: CampaignStore,
    routes: RouteStore,
    admission: AdmissionController,
    calls: CallRegistry,
    originator: Arc<dyn Originator>,
    runners: DashMap<Uuid, Arc<RunnerHandle>>,
    /// Pacing between successive originations within one campaign
    dial_interval: Duration,
    /// Backoff when the queue is empty or admission denies
    idle_poll: Duration,
    max_dial_attempts: u32,
}

impl DialerRegistry {
    pub fn new(
        campaigns: CampaignStore,
        routes: RouteStore,
        admission: AdmissionController,
        calls: CallRegistry,
        originator: Arc<dyn Originator>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                campaigns,
                routes,
                admission,
                calls,
                originator,
                runners: DashMap::new(),
                dial_interval: Duration::from_millis(config.dial_interval_ms),
                idle_poll: Duration::from_millis(config.idle_poll_ms),
                max_dial_attempts: config.max_dial_attempts,
            }),
        }
    }

    /// Authorize and start a campaign: budget check against the owner's
    /// balance, the single-winner status claim, lead promotion, then the
    /// dispatch loop as its own task.
    pub fn start(&self, campaign_id: Uuid) -> Result<Campaign> {
        let inner = &self.inner;
        let campaign = inner
            .campaigns
            .get(campaign_id)
            .ok_or(Error::CampaignNotFound(campaign_id))?;
        if campaign.status == CampaignStatus::Running {
            return Err(Error::AlreadyRunning(campaign_id));
        }
        if inner.routes.get(campaign.route_id).is_none() {
            return Err(Error::RouteNotFound(campaign.route_id));
        }

        let dialable = inner.campaigns.dialable_remaining(campaign_id);
        let required_cents = inner.admission.authorize_start(campaign.user_id, dialable)?;

        // Exactly one concurrent start wins this transition
        let campaign = inner.campaigns.begin_start(campaign_id)?;
        let queued = inner.campaigns.queue_pending_leads(campaign_id);

        let handle = Arc::new(RunnerHandle {
            stop: AtomicBool::new(false),
        });
        inner.runners.insert(campaign_id, handle.clone());

        info!(
            campaign_id = %campaign_id,
            queued,
            required_cents,
            "Campaign started"
        );

        let registry = self.clone();
        let running = campaign.clone();
        tokio::spawn(async move {
            registry.run_loop(running, handle.clone()).await;
            // A stop-then-restart may have installed a newer handle for
            // this campaign; only remove the entry if it is still ours
            registry
                .inner
                .runners
                .remove_if(&campaign_id, |_, current| Arc::ptr_eq(current, &handle));
        });

        Ok(campaign)
    }

    /// Stop pulling new leads. In-flight originations and live channels
    /// are left to reach their terminal states on their own.
    pub fn stop(&self, campaign_id: Uuid) -> Result<Campaign> {
        let inner = &self.inner;
        let campaign = inner
            .campaigns
            .get(campaign_id)
            .ok_or(Error::CampaignNotFound(campaign_id))?;
        if campaign.status != CampaignStatus::Running {
            return Err(Error::InvalidRequest(format!(
                "campaign {} is not running",
                campaign_id
            )));
        }

        if let Some(handle) = inner.runners.get(&campaign_id) {
            handle.stop.store(true, Ordering::SeqCst);
        }
        inner.campaigns.mark_paused(campaign_id);

        inner
            .campaigns
            .get(campaign_id)
            .ok_or(Error::CampaignNotFound(campaign_id))
    }

    /// Flip every runner's stop flag, used at service shutdown.
    pub fn stop_all(&self) {
        for entry in self.inner.runners.iter() {
            entry.value().stop.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self, campaign_id: Uuid) -> bool {
        self.inner.runners.contains_key(&campaign_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.runners.len()
    }

    async fn run_loop(&self, campaign: Campaign, handle: Arc<RunnerHandle>) {
        let inner = &self.inner;
        loop {
            // Observed before every claim; stop never preempts a call
            if handle.stop.load(Ordering::SeqCst) {
                info!(campaign_id = %campaign.id, "Dispatch loop stopped");
                break;
            }

            if inner.campaigns.dialable_remaining(campaign.id) == 0 {
                inner.campaigns.mark_completed(campaign.id);
                info!(campaign_id = %campaign.id, "Lead queue exhausted");
                break;
            }

            let Some(lead) = inner.campaigns.claim_next_queued(campaign.id) else {
                // Remaining dialable leads are mid-flight; wait them out
                tokio::time::sleep(inner.idle_poll).await;
                continue;
            };

            let Some(route) = inner.routes.get(campaign.route_id) else {
                warn!(
                    campaign_id = %campaign.id,
                    route_id = %campaign.route_id,
                    "Route removed mid-campaign, failing lead"
                );
                inner
                    .campaigns
                    .record_dial_failure(lead.id, false, inner.max_dial_attempts);
                continue;
            };

            match inner.admission.try_admit(&route, campaign.user_id) {
                Err(denied) => {
                    debug!(
                        campaign_id = %campaign.id,
                        lead_id = %lead.id,
                        reason = %denied,
                        "Call not admitted"
                    );
                    inner.campaigns.release_claim(lead.id);
                    tokio::time::sleep(inner.idle_poll).await;
                }
                Ok(permit) => {
                    self.spawn_origination(campaign.clone(), lead, route, permit);
                    tokio::time::sleep(inner.dial_interval).await;
                }
            }
        }
    }

    /// Originate in a dedicated task; a slow or failing provider call
    /// only occupies this lead's slot.
    fn spawn_origination(
        &self,
        campaign: Campaign,
        lead: CampaignLead,
        route: SipRoute,
        permit: CallPermit,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let request = OriginateRequest {
                route: route.clone(),
                dial_number: lead.phone.dialable().to_string(),
                caller_id: campaign.caller_id.clone(),
                timeout_secs: None,
                variables: vec![
                    ("RINGFLOW_CAMPAIGN_ID".to_string(), campaign.id.to_string()),
                    ("RINGFLOW_LEAD_ID".to_string(), lead.id.to_string()),
                ],
                app_args: vec![campaign.id.to_string()],
            };

            match inner.originator.originate(&request).await {
                Ok(origination) => {
                    inner.campaigns.record_dial_issued(lead.id);
                    inner
                        .calls
                        .open_session(&campaign, &lead, &route, origination.channel_id, permit);
                }
                Err(e) => {
                    let outcome = inner.campaigns.record_dial_failure(
                        lead.id,
                        e.is_retryable(),
                        inner.max_dial_attempts,
                    );
                    warn!(
                        campaign_id = %campaign.id,
                        lead_id = %lead.id,
                        error = %e,
                        outcome = ?outcome,
                        "Origination failed"
                    );
                    // permit drops here, freeing both channel slots
                }
            }
        });
    }
}
