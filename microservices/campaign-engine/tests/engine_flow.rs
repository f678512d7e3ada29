//! Campaign Engine integration tests
//!
//! Drives the wired engine end to end over a mock originator: dispatch,
//! event application, settlement, and top-up reconciliation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use uuid::Uuid;

use campaign_engine::bridge::{OriginateRequest, Origination, Originator, ProviderResult};
use campaign_engine::calls::BridgeEvent;
use campaign_engine::ledger::{AdjustmentKind, AdjustmentSource};
use campaign_engine::model::{CampaignStatus, LeadStatus, SipRoute};
use campaign_engine::topup::IpnUpdate;
use campaign_engine::{AppState, Config};

/// Succeeds every origination with channel ids chan-0, chan-1, ...
struct CountingOriginator {
    placed: AtomicUsize,
}

impl CountingOriginator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            placed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Originator for CountingOriginator {
    async fn originate(&self, _request: &OriginateRequest) -> ProviderResult<Origination> {
        let n = self.placed.fetch_add(1, Ordering::SeqCst);
        Ok(Origination {
            channel_id: format!("chan-{}", n),
        })
    }
}

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ari_base_url: "http://127.0.0.1:8088/ari".to_string(),
        ari_username: "u".to_string(),
        ari_password: "p".to_string(),
        ari_app: "ringflow-dialer".to_string(),
        ari_timeout_secs: 30,
        max_active_channels: 10,
        lead_rate_cents: 5,
        dial_interval_ms: 1,
        idle_poll_ms: 5,
        voicemail_retry_limit: 1,
        max_dial_attempts: 3,
        bridge_base_url: None,
        bridge_token: None,
        ipn_secret: "ipn-secret".to_string(),
    }
}

fn engine(balance_cents: i64, rate_cents_per_min: i64) -> (AppState, Uuid, Uuid) {
    let state = AppState::new(test_config(), CountingOriginator::new());

    let owner = Uuid::new_v4();
    state.ledger.open_account(owner, balance_cents).unwrap();

    let now = Utc::now();
    let route = state.routes.upsert(SipRoute {
        id: Uuid::new_v4(),
        name: "us-east".to_string(),
        domain: None,
        outbound_uri: None,
        username: None,
        password: None,
        rate_cents_per_min,
        max_channels: 5,
        active: true,
        overrides: Default::default(),
        created_at: now,
        updated_at: now,
    });

    (state, owner, route.id)
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

fn event_answered(channel: &str) -> BridgeEvent {
    BridgeEvent::ChannelAnswered {
        channel_id: channel.to_string(),
    }
}

fn event_hangup(channel: &str, duration_secs: u64) -> BridgeEvent {
    BridgeEvent::ChannelHangup {
        channel_id: channel.to_string(),
        cause: Some("normal".to_string()),
        duration_secs: Some(duration_secs),
    }
}

#[tokio::test]
async fn campaign_runs_end_to_end_with_settlement() {
    let (state, owner, route_id) = engine(10_000, 10);
    let campaign =
        state
            .campaigns
            .create_campaign(owner, "renewals".to_string(), "+15550100".to_string(), route_id);

    let report = state
        .campaigns
        .load_leads(
            campaign.id,
            &[
                "Jane Doe, +1 (415) 555-0187, renewal".to_string(),
                "no number in this line".to_string(),
                "+14155550190".to_string(),
            ],
        )
        .unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.rejected_lines, vec![2]);

    state.dialer.start(campaign.id).unwrap();

    let calls = state.calls.clone();
    let id = campaign.id;
    wait_for(move || calls.sessions_for_campaign(id).len() == 2).await;

    // First callee answers and presses 1, second never picks up
    state.calls.apply(BridgeEvent::ChannelRinging {
        channel_id: "chan-0".to_string(),
    });
    state.calls.apply(event_answered("chan-0"));
    state.calls.apply(BridgeEvent::DtmfReceived {
        channel_id: "chan-0".to_string(),
        digits: "1".to_string(),
    });
    state.calls.apply(event_hangup("chan-0", 60));

    state.calls.apply(BridgeEvent::ChannelRinging {
        channel_id: "chan-1".to_string(),
    });
    state.calls.apply(BridgeEvent::ChannelHangup {
        channel_id: "chan-1".to_string(),
        cause: Some("no answer".to_string()),
        duration_secs: None,
    });

    let campaigns = state.campaigns.clone();
    wait_for(move || campaigns.get(id).map(|c| c.status) == Some(CampaignStatus::Completed)).await;

    // One billed minute debited, the failed attempt free
    assert_eq!(state.ledger.balance(owner).unwrap(), 10_000 - 10);
    let history = state.ledger.adjustments(owner, 10);
    assert_eq!(history[0].kind, AdjustmentKind::Debit);
    assert_eq!(history[0].source, AdjustmentSource::Call);
    assert_eq!(history[0].amount_cents, 10);

    let sessions = state.calls.sessions_for_campaign(campaign.id);
    let answered = sessions.iter().find(|s| s.channel_id == "chan-0").unwrap();
    assert_eq!(answered.digits, "1");
    assert_eq!(answered.cost_cents, Some(10));

    let leads = state.campaigns.leads_for(campaign.id);
    let statuses: Vec<LeadStatus> = leads.iter().map(|l| l.status).collect();
    assert!(statuses.contains(&LeadStatus::Connected));
    assert!(statuses.contains(&LeadStatus::Failed));
}

#[tokio::test]
async fn voicemail_retries_then_finalizes_the_lead() {
    let (state, _owner, route_id) = engine(10_000, 10);
    let campaign = state.campaigns.create_campaign(
        Uuid::new_v4(),
        "vm".to_string(),
        "+15550100".to_string(),
        route_id,
    );
    // Separate owner account for this campaign
    state
        .ledger
        .open_account(campaign.user_id, 10_000)
        .unwrap();
    state
        .campaigns
        .load_leads(campaign.id, &["+14155550187".to_string()])
        .unwrap();

    state.dialer.start(campaign.id).unwrap();

    let calls = state.calls.clone();
    let id = campaign.id;
    wait_for(move || calls.sessions_for_campaign(id).len() == 1).await;

    // Machine answers: lead requeued once (retry limit 1)
    state.calls.apply(event_answered("chan-0"));
    state.calls.apply(BridgeEvent::VoicemailDetected {
        channel_id: "chan-0".to_string(),
    });
    state.calls.apply(event_hangup("chan-0", 20));

    let calls = state.calls.clone();
    wait_for(move || calls.sessions_for_campaign(id).len() == 2).await;

    // Machine again: retries exhausted, lead terminal
    state.calls.apply(event_answered("chan-1"));
    state.calls.apply(BridgeEvent::VoicemailDetected {
        channel_id: "chan-1".to_string(),
    });
    state.calls.apply(event_hangup("chan-1", 20));

    let campaigns = state.campaigns.clone();
    wait_for(move || campaigns.get(id).map(|c| c.status) == Some(CampaignStatus::Completed)).await;

    let lead = state.campaigns.leads_for(campaign.id).remove(0);
    assert_eq!(lead.status, LeadStatus::Voicemail);
    assert_eq!(lead.voicemail_retries, 1);

    let sessions = state.calls.sessions_for_campaign(campaign.id);
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.voicemail));
}

#[tokio::test]
async fn signed_topup_callback_credits_exactly_once() {
    let (state, owner, _route_id) = engine(0, 10);

    state
        .topups
        .create_invoice(owner, "order-77", 2_500, Some("btc".to_string()))
        .unwrap();

    let body = br#"{"order_id":"order-77","payment_status":"finished","payment_id":4482191,"pay_amount":0.0021,"pay_currency":"btc"}"#;
    let mut mac = Hmac::<Sha512>::new_from_slice(b"ipn-secret").unwrap();
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());

    // Tampered body is rejected before parsing
    assert!(!state.topups.verify_signature(b"tampered", &signature));

    assert!(state.topups.verify_signature(body, &signature));
    let update: IpnUpdate = serde_json::from_slice(body).unwrap();

    state.topups.apply_update(&update).unwrap();
    assert_eq!(state.ledger.balance(owner).unwrap(), 2_500);

    // Provider-duplicated callback is a no-op
    state.topups.apply_update(&update).unwrap();
    assert_eq!(state.ledger.balance(owner).unwrap(), 2_500);
    assert_eq!(state.ledger.adjustments(owner, 10).len(), 1);

    let invoice = state.topups.invoice("order-77").unwrap();
    assert!(invoice.settled_at.is_some());
    assert_eq!(invoice.payment_id.as_deref(), Some("4482191"));

    let invoices = state.topups.invoices_for(owner);
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].order_id, "order-77");
}

#[tokio::test]
async fn concurrency_stays_under_the_global_ceiling() {
    let mut config = test_config();
    config.max_active_channels = 2;
    let state = AppState::new(config, CountingOriginator::new());

    let owner = Uuid::new_v4();
    state.ledger.open_account(owner, 100_000).unwrap();

    let now = Utc::now();
    let route = state.routes.upsert(SipRoute {
        id: Uuid::new_v4(),
        name: "capped".to_string(),
        domain: None,
        outbound_uri: None,
        username: None,
        password: None,
        rate_cents_per_min: 10,
        max_channels: 10,
        active: true,
        overrides: Default::default(),
        created_at: now,
        updated_at: now,
    });

    let campaign = state.campaigns.create_campaign(
        owner,
        "capped".to_string(),
        "+15550100".to_string(),
        route.id,
    );
    let lines: Vec<String> = (0..6).map(|i| format!("+1415555010{}", i)).collect();
    state.campaigns.load_leads(campaign.id, &lines).unwrap();

    state.dialer.start(campaign.id).unwrap();

    // Two slots fill and stay full until events release them
    let calls = state.calls.clone();
    let id = campaign.id;
    wait_for(move || calls.sessions_for_campaign(id).len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.calls.active_sessions().len(), 2);

    // Release slots one by one; the dialer backfills each, never
    // exceeding the ceiling
    for n in 0..6 {
        let channel = format!("chan-{}", n);
        let calls = state.calls.clone();
        let ch = channel.clone();
        wait_for(move || {
            calls
                .sessions_for_campaign(id)
                .iter()
                .any(|s| s.channel_id == ch)
        })
        .await;
        assert!(state.calls.active_sessions().len() <= 2);
        state.calls.apply(event_answered(&channel));
        state.calls.apply(event_hangup(&channel, 6));
    }

    let campaigns = state.campaigns.clone();
    wait_for(move || campaigns.get(id).map(|c| c.status) == Some(CampaignStatus::Completed)).await;
    assert_eq!(state.calls.sessions_for_campaign(campaign.id).len(), 6);
}
