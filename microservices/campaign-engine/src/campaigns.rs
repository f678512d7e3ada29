//! Campaign and lead registry
//!
//! Owns campaign lifecycle transitions and the per-campaign lead queue.
//! Every transition that matters for correctness is a compare-and-set
//! under the entry lock, so concurrent starts, dispatcher claims and
//! event-driven updates never double-apply.

use chrono::Utc;
use dashmap::DashMap;
use ringflow_core::PhoneNumber;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Campaign, CampaignLead, CampaignStatus, LeadCounts, LeadStatus};

/// Outcome of loading a batch of raw lead lines
#[derive(Debug, Clone, serde::Serialize)]
pub struct LeadBatchReport {
    pub loaded: usize,
    /// 1-based indexes of lines with no dialable number
    pub rejected_lines: Vec<usize>,
}

/// Outcome of a failed origination attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFailureOutcome {
    Requeued,
    Failed,
}

/// Outcome of a voicemail detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicemailOutcome {
    Requeued,
    Final,
}

/// In-memory campaign and lead store
#[derive(Clone)]
pub struct CampaignStore {
    campaigns: Arc<DashMap<Uuid, Campaign>>,
    leads: Arc<DashMap<Uuid, CampaignLead>>,
    /// Lead ids per campaign in load order; claims scan this oldest-first
    lead_order: Arc<DashMap<Uuid, Vec<Uuid>>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self {
            campaigns: Arc::new(DashMap::new()),
            leads: Arc::new(DashMap::new()),
            lead_order: Arc::new(DashMap::new()),
        }
    }

    pub fn create_campaign(
        &self,
        user_id: Uuid,
        name: String,
        caller_id: String,
        route_id: Uuid,
    ) -> Campaign {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id,
            name,
            caller_id,
            route_id,
            status: CampaignStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.campaigns.insert(campaign.id, campaign.clone());
        info!(campaign_id = %campaign.id, user_id = %user_id, "Campaign created");
        campaign
    }

    pub fn get(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|c| c.clone())
    }

    pub fn list(&self) -> Vec<Campaign> {
        self.campaigns.iter().map(|c| c.clone()).collect()
    }

    /// Load raw source lines as leads. Lines without a dialable number are
    /// reported by index; the valid remainder is kept. A batch with no
    /// valid line at all is rejected outright.
    pub fn load_leads(&self, campaign_id: Uuid, lines: &[String]) -> Result<LeadBatchReport> {
        if !self.campaigns.contains_key(&campaign_id) {
            return Err(Error::CampaignNotFound(campaign_id));
        }

        let mut loaded = 0usize;
        let mut rejected = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            match PhoneNumber::extract(line) {
                Some(phone) => {
                    let now = Utc::now();
                    let lead = CampaignLead {
                        id: Uuid::new_v4(),
                        campaign_id,
                        phone,
                        source_line: Some(line.trim().to_string()),
                        status: LeadStatus::Pending,
                        dial_attempts: 0,
                        voicemail_retries: 0,
                        created_at: now,
                        updated_at: now,
                    };
                    self.lead_order
                        .entry(campaign_id)
                        .or_default()
                        .push(lead.id);
                    self.leads.insert(lead.id, lead);
                    loaded += 1;
                }
                None => rejected.push(idx + 1),
            }
        }

        if loaded == 0 && !rejected.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "no dialable number in any line (lines {:?})",
                rejected
            )));
        }

        info!(
            campaign_id = %campaign_id,
            loaded = loaded,
            rejected = rejected.len(),
            "Lead batch loaded"
        );
        Ok(LeadBatchReport {
            loaded,
            rejected_lines: rejected,
        })
    }

    /// Atomically move a campaign into RUNNING. The entry lock makes this
    /// the single guard against concurrent starts.
    pub fn begin_start(&self, id: Uuid) -> Result<Campaign> {
        let mut campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or(Error::CampaignNotFound(id))?;

        match campaign.status {
            CampaignStatus::Running => return Err(Error::AlreadyRunning(id)),
            CampaignStatus::Completed => {
                return Err(Error::InvalidRequest(format!(
                    "campaign {} is completed",
                    id
                )))
            }
            CampaignStatus::Pending | CampaignStatus::Paused => {}
        }

        let now = Utc::now();
        campaign.status = CampaignStatus::Running;
        campaign.updated_at = now;
        if campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        Ok(campaign.clone())
    }

    /// Promote PENDING leads to QUEUED when a campaign starts.
    pub fn queue_pending_leads(&self, campaign_id: Uuid) -> usize {
        let ids = self.lead_ids(campaign_id);
        let mut promoted = 0usize;
        for lead_id in ids {
            if let Some(mut lead) = self.leads.get_mut(&lead_id) {
                if lead.status == LeadStatus::Pending {
                    lead.status = LeadStatus::Queued;
                    lead.updated_at = Utc::now();
                    promoted += 1;
                }
            }
        }
        promoted
    }

    pub fn mark_paused(&self, id: Uuid) {
        if let Some(mut campaign) = self.campaigns.get_mut(&id) {
            if campaign.status == CampaignStatus::Running {
                campaign.status = CampaignStatus::Paused;
                campaign.updated_at = Utc::now();
                info!(campaign_id = %id, "Campaign paused");
            }
        }
    }

    pub fn mark_completed(&self, id: Uuid) {
        if let Some(mut campaign) = self.campaigns.get_mut(&id) {
            if campaign.status == CampaignStatus::Running {
                let now = Utc::now();
                campaign.status = CampaignStatus::Completed;
                campaign.completed_at = Some(now);
                campaign.updated_at = now;
                info!(campaign_id = %id, "Campaign completed");
            }
        }
    }

    /// Claim the oldest QUEUED lead, moving it to DIALING. Returns None
    /// when the queue is empty.
    pub fn claim_next_queued(&self, campaign_id: Uuid) -> Option<CampaignLead> {
        for lead_id in self.lead_ids(campaign_id) {
            if let Some(mut lead) = self.leads.get_mut(&lead_id) {
                if lead.status == LeadStatus::Queued {
                    lead.status = LeadStatus::Dialing;
                    lead.updated_at = Utc::now();
                    return Some(lead.clone());
                }
            }
        }
        None
    }

    /// Return a claimed lead to the queue without consuming an attempt,
    /// used when per-call admission denies capacity.
    pub fn release_claim(&self, lead_id: Uuid) {
        if let Some(mut lead) = self.leads.get_mut(&lead_id) {
            if lead.status == LeadStatus::Dialing {
                lead.status = LeadStatus::Queued;
                lead.updated_at = Utc::now();
            }
        }
    }

    /// Count an issued origination against the lead.
    pub fn record_dial_issued(&self, lead_id: Uuid) {
        if let Some(mut lead) = self.leads.get_mut(&lead_id) {
            lead.dial_attempts += 1;
            lead.updated_at = Utc::now();
        }
    }

    /// Apply a failed origination: retryable failures requeue until the
    /// attempt cap, everything else fails the lead.
    pub fn record_dial_failure(
        &self,
        lead_id: Uuid,
        retryable: bool,
        max_attempts: u32,
    ) -> DialFailureOutcome {
        let Some(mut lead) = self.leads.get_mut(&lead_id) else {
            return DialFailureOutcome::Failed;
        };
        lead.dial_attempts += 1;
        lead.updated_at = Utc::now();
        if retryable && lead.dial_attempts < max_attempts {
            lead.status = LeadStatus::Queued;
            DialFailureOutcome::Requeued
        } else {
            lead.status = LeadStatus::Failed;
            DialFailureOutcome::Failed
        }
    }

    /// Lead answered by a human (or at least answered).
    pub fn mark_connected(&self, lead_id: Uuid) {
        if let Some(mut lead) = self.leads.get_mut(&lead_id) {
            if matches!(lead.status, LeadStatus::Dialing | LeadStatus::Queued) {
                lead.status = LeadStatus::Connected;
                lead.updated_at = Utc::now();
            }
        }
    }

    /// Voicemail detected on the active attempt: requeue while retries
    /// remain, otherwise the lead terminates as VOICEMAIL.
    pub fn record_voicemail(&self, lead_id: Uuid, retry_limit: u32) -> VoicemailOutcome {
        let Some(mut lead) = self.leads.get_mut(&lead_id) else {
            return VoicemailOutcome::Final;
        };
        lead.updated_at = Utc::now();
        if lead.voicemail_retries < retry_limit {
            lead.voicemail_retries += 1;
            lead.status = LeadStatus::Queued;
            VoicemailOutcome::Requeued
        } else {
            lead.status = LeadStatus::Voicemail;
            VoicemailOutcome::Final
        }
    }

    /// Unanswered hangup: a lead still DIALING failed. Leads already
    /// CONNECTED, requeued or terminal are left alone.
    pub fn mark_failed_if_dialing(&self, lead_id: Uuid) {
        if let Some(mut lead) = self.leads.get_mut(&lead_id) {
            if lead.status == LeadStatus::Dialing {
                lead.status = LeadStatus::Failed;
                lead.updated_at = Utc::now();
            }
        }
    }

    pub fn lead(&self, lead_id: Uuid) -> Option<CampaignLead> {
        self.leads.get(&lead_id).map(|l| l.clone())
    }

    pub fn leads_for(&self, campaign_id: Uuid) -> Vec<CampaignLead> {
        self.lead_ids(campaign_id)
            .into_iter()
            .filter_map(|id| self.leads.get(&id).map(|l| l.clone()))
            .collect()
    }

    pub fn lead_counts(&self, campaign_id: Uuid) -> LeadCounts {
        let mut counts = LeadCounts::default();
        for lead_id in self.lead_ids(campaign_id) {
            if let Some(lead) = self.leads.get(&lead_id) {
                counts.tally(lead.status);
            }
        }
        counts
    }

    /// Leads still eligible for dialing or in flight. The dispatcher
    /// completes the campaign when this reaches zero.
    pub fn dialable_remaining(&self, campaign_id: Uuid) -> usize {
        self.lead_ids(campaign_id)
            .into_iter()
            .filter_map(|id| self.leads.get(&id))
            .filter(|l| l.status.is_dialable())
            .count()
    }

    fn lead_ids(&self, campaign_id: Uuid) -> Vec<Uuid> {
        self.lead_order
            .get(&campaign_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

impl Default for CampaignStore {
    fn default() -> Self {
        Self::new()
    }
}
