//! Call session registry and state machine
//!
//! One CallSession per dialing attempt, keyed by the provider channel id
//! for event application. Transitions move strictly forward
//! (PLACING -> RINGING -> ANSWERED -> COMPLETED, FAILED from any
//! non-terminal state); the entry lock makes each transition, and the
//! settlement that rides on it, happen exactly once.

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::campaigns::{CampaignStore, VoicemailOutcome};
use crate::dialer::admission::CallPermit;
use crate::ledger::{AdjustmentSource, LedgerService};
use crate::model::{Campaign, CampaignLead, CallSession, CallStatus, SipRoute};
use crate::notify::{DtmfNotification, NotificationDispatcher};
use crate::routes_store::RouteStore;

/// Inbound signaling events pushed by the platform's telephony bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    ChannelRinging {
        channel_id: String,
    },
    ChannelAnswered {
        channel_id: String,
    },
    DtmfReceived {
        channel_id: String,
        digits: String,
    },
    VoicemailDetected {
        channel_id: String,
    },
    ChannelHangup {
        channel_id: String,
        #[serde(default)]
        cause: Option<String>,
        #[serde(default)]
        duration_secs: Option<u64>,
    },
}

impl BridgeEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::ChannelRinging { channel_id }
            | Self::ChannelAnswered { channel_id }
            | Self::DtmfReceived { channel_id, .. }
            | Self::VoicemailDetected { channel_id }
            | Self::ChannelHangup { channel_id, .. } => channel_id,
        }
    }
}

/// Cost of a completed call: duration at the route's per-minute rate,
/// rounded half-up to whole cents.
pub fn settle_cost(duration_secs: u64, rate_cents_per_min: i64) -> i64 {
    (duration_secs as i64 * rate_cents_per_min + 30) / 60
}

#[derive(Clone)]
pub struct CallRegistry {
    sessions: Arc<DashMap<Uuid, CallSession>>,
    by_channel: Arc<DashMap<String, Uuid>>,
    /// Channel permits held until the session terminates
    permits: Arc<DashMap<Uuid, CallPermit>>,
    campaigns: CampaignStore,
    routes: RouteStore,
    ledger: LedgerService,
    notifier: NotificationDispatcher,
    voicemail_retry_limit: u32,
}

impl CallRegistry {
    pub fn new(
        campaigns: CampaignStore,
        routes: RouteStore,
        ledger: LedgerService,
        notifier: NotificationDispatcher,
        voicemail_retry_limit: u32,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            by_channel: Arc::new(DashMap::new()),
            permits: Arc::new(DashMap::new()),
            campaigns,
            routes,
            ledger,
            notifier,
            voicemail_retry_limit,
        }
    }

    /// Record a successfully originated attempt. The permit stays parked
    /// here until a terminal event releases the channel slots.
    pub fn open_session(
        &self,
        campaign: &Campaign,
        lead: &CampaignLead,
        route: &SipRoute,
        channel_id: String,
        permit: CallPermit,
    ) -> CallSession {
        let session = CallSession {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            lead_id: lead.id,
            route_id: route.id,
            channel_id: channel_id.clone(),
            caller_id: campaign.caller_id.clone(),
            dialed_number: lead.phone.dialable().to_string(),
            status: CallStatus::Placing,
            digits: String::new(),
            voicemail: false,
            placed_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_secs: None,
            cost_cents: None,
            hangup_cause: None,
        };

        self.permits.insert(session.id, permit);
        self.by_channel.insert(channel_id, session.id);
        self.sessions.insert(session.id, session.clone());
        info!(
            session_id = %session.id,
            campaign_id = %campaign.id,
            channel_id = %session.channel_id,
            "Call placed"
        );
        session
    }

    /// Apply one provider event. Events for unknown channels are logged
    /// and dropped.
    pub fn apply(&self, event: BridgeEvent) {
        let Some(session_id) = self.by_channel.get(event.channel_id()).map(|e| *e) else {
            warn!(channel_id = %event.channel_id(), "Event for unknown channel");
            return;
        };

        match event {
            BridgeEvent::ChannelRinging { .. } => self.on_ringing(session_id),
            BridgeEvent::ChannelAnswered { .. } => self.on_answered(session_id),
            BridgeEvent::DtmfReceived { digits, .. } => self.on_dtmf(session_id, digits),
            BridgeEvent::VoicemailDetected { .. } => self.on_voicemail(session_id),
            BridgeEvent::ChannelHangup {
                channel_id,
                cause,
                duration_secs,
            } => self.on_hangup(session_id, channel_id, cause, duration_secs),
        }
    }

    fn on_ringing(&self, session_id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.status == CallStatus::Placing {
                session.status = CallStatus::Ringing;
            }
        }
    }

    fn on_answered(&self, session_id: Uuid) {
        let lead_id = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if !matches!(session.status, CallStatus::Placing | CallStatus::Ringing) {
                return;
            }
            session.status = CallStatus::Answered;
            session.answered_at = Some(Utc::now());
            session.lead_id
        };

        self.campaigns.mark_connected(lead_id);
    }

    fn on_dtmf(&self, session_id: Uuid, digits: String) {
        let captured = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if session.status != CallStatus::Answered {
                debug!(session_id = %session_id, "DTMF before answer, ignoring");
                return;
            }
            if digits == session.digits {
                return;
            }
            // Progressive accumulation: accept only strict extensions of
            // the captured string; out-of-order fragments are stale.
            if !(digits.len() > session.digits.len() && digits.starts_with(&session.digits)) {
                debug!(
                    session_id = %session_id,
                    captured = %session.digits,
                    received = %digits,
                    "Stale DTMF fragment, ignoring"
                );
                return;
            }
            session.digits = digits;
            (
                session.campaign_id,
                session.lead_id,
                session.caller_id.clone(),
                session.dialed_number.clone(),
                session.digits.clone(),
            )
        };

        let (campaign_id, lead_id, caller_id, dialed_number, digits) = captured;
        self.campaigns.mark_connected(lead_id);

        let Some(campaign) = self.campaigns.get(campaign_id) else {
            warn!(campaign_id = %campaign_id, "DTMF for unknown campaign, skipping notification");
            return;
        };
        let notification = DtmfNotification {
            digits,
            caller_id,
            dialed_number,
            source_line: self
                .campaigns
                .lead(lead_id)
                .and_then(|lead| lead.source_line),
        };

        info!(
            session_id = %session_id,
            digits = %notification.digits,
            "DTMF captured"
        );

        let notifier = self.notifier.clone();
        let owner = campaign.user_id;
        tokio::spawn(async move {
            notifier.dispatch(owner, &notification).await;
        });
    }

    fn on_voicemail(&self, session_id: Uuid) {
        let lead_id = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if session.status.is_terminal() {
                return;
            }
            session.voicemail = true;
            session.lead_id
        };

        match self
            .campaigns
            .record_voicemail(lead_id, self.voicemail_retry_limit)
        {
            VoicemailOutcome::Requeued => {
                info!(session_id = %session_id, lead_id = %lead_id, "Voicemail detected, lead requeued")
            }
            VoicemailOutcome::Final => {
                info!(session_id = %session_id, lead_id = %lead_id, "Voicemail detected, retries exhausted")
            }
        }
    }

    fn on_hangup(
        &self,
        session_id: Uuid,
        channel_id: String,
        cause: Option<String>,
        duration_secs: Option<u64>,
    ) {
        let rate_cents_per_min = self
            .sessions
            .get(&session_id)
            .and_then(|s| self.routes.get(s.route_id))
            .map(|r| r.rate_cents_per_min)
            .unwrap_or(0);

        enum Settled {
            Completed {
                campaign_id: Uuid,
                cost_cents: i64,
                duration: u64,
            },
            Failed {
                lead_id: Uuid,
            },
            AlreadyTerminal,
        }

        let outcome = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if session.status.is_terminal() {
                Settled::AlreadyTerminal
            } else if session.status == CallStatus::Answered {
                let now = Utc::now();
                let duration = duration_secs.unwrap_or_else(|| {
                    session
                        .answered_at
                        .map(|t| (now - t).num_seconds().max(0) as u64)
                        .unwrap_or(0)
                });
                let cost_cents = settle_cost(duration, rate_cents_per_min);
                session.status = CallStatus::Completed;
                session.ended_at = Some(now);
                session.duration_secs = Some(duration);
                session.cost_cents = Some(cost_cents);
                session.hangup_cause = cause;
                Settled::Completed {
                    campaign_id: session.campaign_id,
                    cost_cents,
                    duration,
                }
            } else {
                session.status = CallStatus::Failed;
                session.ended_at = Some(Utc::now());
                session.duration_secs = Some(0);
                session.cost_cents = Some(0);
                session.hangup_cause = cause;
                Settled::Failed {
                    lead_id: session.lead_id,
                }
            }
        };

        match outcome {
            Settled::AlreadyTerminal => return,
            Settled::Completed {
                campaign_id,
                cost_cents,
                duration,
            } => {
                info!(
                    session_id = %session_id,
                    duration_secs = duration,
                    cost_cents,
                    "Call completed"
                );
                if cost_cents > 0 {
                    self.settle_debit(session_id, campaign_id, cost_cents);
                }
            }
            Settled::Failed { lead_id } => {
                info!(session_id = %session_id, "Call failed before answer");
                self.campaigns.mark_failed_if_dialing(lead_id);
            }
        }

        // Terminal either way: free the channel slots and the index
        self.permits.remove(&session_id);
        self.by_channel.remove(&channel_id);
    }

    fn settle_debit(&self, session_id: Uuid, campaign_id: Uuid, cost_cents: i64) {
        let Some(campaign) = self.campaigns.get(campaign_id) else {
            warn!(session_id = %session_id, "Settlement for unknown campaign, debit skipped");
            return;
        };
        if let Err(e) = self.ledger.debit(
            campaign.user_id,
            cost_cents,
            AdjustmentSource::Call,
            &format!("Call settlement {}", session_id),
            Some(session_id.to_string()),
        ) {
            // The session keeps its cost; the ledger write is aborted
            // whole so the balance can never go negative.
            warn!(
                session_id = %session_id,
                cost_cents,
                error = %e,
                "Settlement debit failed"
            );
        }
    }

    pub fn session(&self, id: Uuid) -> Option<CallSession> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn active_sessions(&self) -> Vec<CallSession> {
        self.sessions
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.clone())
            .collect()
    }

    pub fn sessions_for_campaign(&self, campaign_id: Uuid) -> Vec<CallSession> {
        self.sessions
            .iter()
            .filter(|s| s.campaign_id == campaign_id)
            .map(|s| s.clone())
            .collect()
    }

    pub fn active_count_for(&self, campaign_id: Uuid) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.campaign_id == campaign_id && !s.status.is_terminal())
            .count()
    }
}
