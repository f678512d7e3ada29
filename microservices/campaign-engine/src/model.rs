//! Domain types for the campaign engine
//!
//! Covers campaigns and their lead lists, per-attempt call sessions,
//! SIP route projections and top-up invoices.

use chrono::{DateTime, Utc};
use ringflow_core::PhoneNumber;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Running,
    Paused,
    Completed,
}

/// An outbound dialing campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    /// Owning user (ledger account holder)
    pub user_id: Uuid,
    pub name: String,
    /// Caller id presented on originated calls
    pub caller_id: String,
    /// Route used for every call in this campaign
    pub route_id: Uuid,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lead lifecycle status
///
/// Transitions move forward only, except the bounded VOICEMAIL requeue
/// (DIALING/CONNECTED back to QUEUED while retries remain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Queued,
    Dialing,
    Connected,
    Failed,
    Voicemail,
}

impl LeadStatus {
    /// A lead still eligible for (re)dialing or currently in flight.
    pub fn is_dialable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Dialing)
    }
}

/// A single destination within a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub phone: PhoneNumber,
    /// Original source line the lead was loaded from, for display and
    /// notification context
    pub source_line: Option<String>,
    pub status: LeadStatus,
    /// Origination attempts consumed (bounded by config)
    pub dial_attempts: u32,
    /// Voicemail requeues consumed (bounded by config)
    pub voicemail_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Call attempt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Placing,
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One dialing attempt against one lead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub route_id: Uuid,
    /// Channel id assigned by the signaling provider
    pub channel_id: String,
    pub caller_id: String,
    pub dialed_number: String,
    pub status: CallStatus,
    /// Captured DTMF digits, longest prefix-consistent string seen so far
    pub digits: String,
    pub voicemail: bool,
    pub placed_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Billable duration in seconds, set once on hangup
    pub duration_secs: Option<u64>,
    /// Settled cost in cents; zero unless the session completed
    pub cost_cents: Option<i64>,
    pub hangup_cause: Option<String>,
}

/// Typed route configuration derived from platform metadata.
///
/// Parsed once at the ingestion boundary; malformed values are dropped
/// with a warning rather than carried as loose JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteOverrides {
    /// Dial endpoint template, must contain the `{number}` token
    pub dial_endpoint: Option<String>,
}

impl RouteOverrides {
    pub fn from_metadata(metadata: &serde_json::Value) -> Self {
        let dial_endpoint = metadata
            .get("dialEndpoint")
            .and_then(|v| v.as_str())
            .and_then(|tpl| {
                if tpl.contains("{number}") {
                    Some(tpl.to_string())
                } else {
                    tracing::warn!(template = %tpl, "Dial endpoint template lacks {{number}} token, ignoring");
                    None
                }
            });
        Self { dial_endpoint }
    }
}

/// SIP route projection fed by the platform's route manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipRoute {
    pub id: Uuid,
    pub name: String,
    /// SIP domain, may carry a path suffix used verbatim in dial strings
    pub domain: Option<String>,
    /// Fully-formed outbound URI, used when no template overrides it
    pub outbound_uri: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Billing rate in cents per minute
    pub rate_cents_per_min: i64,
    /// Channel ceiling for this route
    pub max_channels: i64,
    pub active: bool,
    #[serde(default)]
    pub overrides: RouteOverrides,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment provider invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Refunded,
    Expired,
}

impl InvoiceStatus {
    /// Parse a provider status string, tolerating case variance.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => Some(Self::Waiting),
            "confirming" => Some(Self::Confirming),
            "confirmed" => Some(Self::Confirmed),
            "sending" => Some(Self::Sending),
            "partially_paid" => Some(Self::PartiallyPaid),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Final statuses end the invoice's lifecycle.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::PartiallyPaid | Self::Finished | Self::Failed | Self::Refunded | Self::Expired
        )
    }

    /// Only a fully settled payment credits the ledger.
    pub fn is_creditable(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Prepaid top-up invoice awaiting payment provider confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpInvoice {
    pub id: Uuid,
    /// Order id shared with the payment provider, the reconciliation key
    pub order_id: String,
    pub user_id: Uuid,
    /// Credit amount in cents once the payment finishes
    pub amount_cents: i64,
    pub pay_currency: Option<String>,
    pub status: InvoiceStatus,
    /// Crediting guard, set exactly once when the ledger credit lands
    pub settled_at: Option<DateTime<Utc>>,
    /// Provider-side payment id from the last callback
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status lead counters for campaign dashboards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadCounts {
    pub pending: usize,
    pub queued: usize,
    pub dialing: usize,
    pub connected: usize,
    pub failed: usize,
    pub voicemail: usize,
}

impl LeadCounts {
    pub fn tally(&mut self, status: LeadStatus) {
        match status {
            LeadStatus::Pending => self.pending += 1,
            LeadStatus::Queued => self.queued += 1,
            LeadStatus::Dialing => self.dialing += 1,
            LeadStatus::Connected => self.connected += 1,
            LeadStatus::Failed => self.failed += 1,
            LeadStatus::Voicemail => self.voicemail += 1,
        }
    }

    /// Leads that can still be dialed or are in flight.
    pub fn dialable(&self) -> usize {
        self.pending + self.queued + self.dialing
    }
}

/// Campaign dashboard projection
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub lead_counts: LeadCounts,
    pub active_calls: usize,
}
