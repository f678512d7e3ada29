//! Top-Up Reconciler
//!
//! Turns signed payment-provider callbacks into ledger credits. Callback
//! signatures are verified over the raw body before any parsing, and
//! crediting is idempotent: the invoice's settled_at is the guard, so a
//! replayed `finished` callback can never credit twice.

use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::{AdjustmentSource, LedgerService};
use crate::model::{InvoiceStatus, TopUpInvoice};

type HmacSha512 = Hmac<Sha512>;

/// Fields consumed from a provider callback; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IpnUpdate {
    pub order_id: String,
    #[serde(alias = "status")]
    pub payment_status: String,
    #[serde(default)]
    pub payment_id: Option<serde_json::Value>,
    #[serde(default)]
    pub pay_amount: Option<f64>,
    #[serde(default)]
    pub pay_currency: Option<String>,
    #[serde(default)]
    pub pay_address: Option<String>,
}

impl IpnUpdate {
    /// Provider payment ids arrive as numbers or strings.
    fn payment_id_string(&self) -> Option<String> {
        match &self.payment_id {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// What a callback did to the invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IpnOutcome {
    Credited,
    AlreadySettled,
    StatusRecorded,
    UnknownOrder,
    UnknownStatus,
}

/// Verify an HMAC-SHA512 hex signature over the raw callback body.
pub fn verify_hmac(secret: &str, body: &[u8], provided_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

#[derive(Clone)]
pub struct TopUpService {
    /// Invoices keyed by provider order id
    // lock order: invoices before ledger accounts
    invoices: Arc<DashMap<String, TopUpInvoice>>,
    ledger: LedgerService,
    ipn_secret: String,
}

impl TopUpService {
    pub fn new(ledger: LedgerService, ipn_secret: String) -> Self {
        Self {
            invoices: Arc::new(DashMap::new()),
            ledger,
            ipn_secret,
        }
    }

    /// Register a pending invoice ahead of the provider callback.
    pub fn create_invoice(
        &self,
        user_id: Uuid,
        order_id: &str,
        amount_cents: i64,
        pay_currency: Option<String>,
    ) -> Result<TopUpInvoice> {
        if order_id.trim().is_empty() {
            return Err(Error::InvalidRequest("order id must not be empty".into()));
        }
        if amount_cents <= 0 {
            return Err(Error::InvalidRequest(
                "top-up amount must be positive".into(),
            ));
        }
        if self.invoices.contains_key(order_id) {
            return Err(Error::InvalidRequest(format!(
                "order id already registered: {}",
                order_id
            )));
        }

        let now = Utc::now();
        let invoice = TopUpInvoice {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            user_id,
            amount_cents,
            pay_currency,
            status: InvoiceStatus::Waiting,
            settled_at: None,
            payment_id: None,
            created_at: now,
            updated_at: now,
        };
        self.invoices
            .insert(invoice.order_id.clone(), invoice.clone());
        info!(order_id = %invoice.order_id, user_id = %user_id, amount_cents, "Top-up invoice created");
        Ok(invoice)
    }

    pub fn invoice(&self, order_id: &str) -> Option<TopUpInvoice> {
        self.invoices.get(order_id).map(|i| i.clone())
    }

    pub fn invoices_for(&self, user_id: Uuid) -> Vec<TopUpInvoice> {
        self.invoices
            .iter()
            .filter(|i| i.user_id == user_id)
            .map(|i| i.clone())
            .collect()
    }

    /// Verify the callback signature against the raw body.
    pub fn verify_signature(&self, body: &[u8], provided_hex: &str) -> bool {
        verify_hmac(&self.ipn_secret, body, provided_hex)
    }

    /// Apply one provider callback. Unknown orders and statuses are
    /// recorded as no-ops; only a first `finished` credits the ledger.
    pub fn apply_update(&self, update: &IpnUpdate) -> Result<IpnOutcome> {
        let Some(mut invoice) = self.invoices.get_mut(&update.order_id) else {
            warn!(order_id = %update.order_id, "Callback for unknown order");
            return Ok(IpnOutcome::UnknownOrder);
        };

        let Some(status) = InvoiceStatus::parse(&update.payment_status) else {
            warn!(
                order_id = %update.order_id,
                status = %update.payment_status,
                "Callback with unknown status"
            );
            return Ok(IpnOutcome::UnknownStatus);
        };

        invoice.status = status;
        invoice.updated_at = Utc::now();
        if let Some(payment_id) = update.payment_id_string() {
            invoice.payment_id = Some(payment_id);
        }
        if invoice.pay_currency.is_none() {
            invoice.pay_currency = update.pay_currency.clone();
        }

        info!(
            order_id = %update.order_id,
            status = ?status,
            pay_amount = ?update.pay_amount,
            pay_address = ?update.pay_address,
            "Payment callback applied"
        );

        if !status.is_creditable() {
            return Ok(IpnOutcome::StatusRecorded);
        }
        if invoice.settled_at.is_some() {
            return Ok(IpnOutcome::AlreadySettled);
        }

        // Credit and set the guard inside the invoice entry section, so a
        // concurrent replay of the same callback observes settled_at.
        self.ledger.credit(
            invoice.user_id,
            invoice.amount_cents,
            AdjustmentSource::Topup,
            &format!("Top-up {}", invoice.order_id),
            Some(invoice.order_id.clone()),
        )?;
        invoice.settled_at = Some(Utc::now());

        info!(
            order_id = %invoice.order_id,
            user_id = %invoice.user_id,
            amount_cents = invoice.amount_cents,
            "Top-up credited"
        );
        Ok(IpnOutcome::Credited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(order_id: &str, status: &str) -> IpnUpdate {
        IpnUpdate {
            order_id: order_id.to_string(),
            payment_status: status.to_string(),
            payment_id: Some(serde_json::json!(4_482_191)),
            pay_amount: Some(0.0021),
            pay_currency: Some("btc".to_string()),
            pay_address: None,
        }
    }

    fn service_with_invoice(amount_cents: i64) -> (TopUpService, LedgerService, Uuid) {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 0).unwrap();
        let service = TopUpService::new(ledger.clone(), "secret".to_string());
        service
            .create_invoice(user, "order-1", amount_cents, None)
            .unwrap();
        (service, ledger, user)
    }

    #[test]
    fn finished_credits_exactly_once() {
        let (service, ledger, user) = service_with_invoice(1_500);

        assert_eq!(
            service.apply_update(&update("order-1", "finished")).unwrap(),
            IpnOutcome::Credited
        );
        assert_eq!(ledger.balance(user).unwrap(), 1_500);

        // Replay is a no-op
        assert_eq!(
            service.apply_update(&update("order-1", "finished")).unwrap(),
            IpnOutcome::AlreadySettled
        );
        assert_eq!(ledger.balance(user).unwrap(), 1_500);
        assert_eq!(ledger.adjustments(user, 10).len(), 1);
    }

    #[test]
    fn non_final_statuses_never_credit() {
        let (service, ledger, user) = service_with_invoice(1_500);
        for status in ["waiting", "confirming", "confirmed", "sending"] {
            assert_eq!(
                service.apply_update(&update("order-1", status)).unwrap(),
                IpnOutcome::StatusRecorded
            );
        }
        assert_eq!(ledger.balance(user).unwrap(), 0);
    }

    #[test]
    fn failed_then_finished_still_credits_once() {
        let (service, ledger, user) = service_with_invoice(900);

        assert_eq!(
            service.apply_update(&update("order-1", "failed")).unwrap(),
            IpnOutcome::StatusRecorded
        );
        assert_eq!(ledger.balance(user).unwrap(), 0);

        assert_eq!(
            service.apply_update(&update("order-1", "finished")).unwrap(),
            IpnOutcome::Credited
        );
        assert_eq!(ledger.balance(user).unwrap(), 900);
    }

    #[test]
    fn unknown_order_and_status_are_no_ops() {
        let (service, ledger, user) = service_with_invoice(900);
        assert_eq!(
            service.apply_update(&update("order-9", "finished")).unwrap(),
            IpnOutcome::UnknownOrder
        );
        assert_eq!(
            service
                .apply_update(&update("order-1", "exploded"))
                .unwrap(),
            IpnOutcome::UnknownStatus
        );
        assert_eq!(ledger.balance(user).unwrap(), 0);
    }

    #[test]
    fn missing_account_aborts_and_allows_retry() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        let service = TopUpService::new(ledger.clone(), "secret".to_string());
        service.create_invoice(user, "order-1", 700, None).unwrap();

        assert!(service.apply_update(&update("order-1", "finished")).is_err());
        assert!(service.invoice("order-1").unwrap().settled_at.is_none());

        ledger.open_account(user, 0).unwrap();
        assert_eq!(
            service.apply_update(&update("order-1", "finished")).unwrap(),
            IpnOutcome::Credited
        );
        assert_eq!(ledger.balance(user).unwrap(), 700);
    }

    #[test]
    fn duplicate_order_registration_is_rejected() {
        let (service, _, user) = service_with_invoice(900);
        assert!(service.create_invoice(user, "order-1", 100, None).is_err());
    }

    #[test]
    fn signature_verification_is_strict() {
        let body = br#"{"order_id":"order-1","payment_status":"finished"}"#;

        let mut mac = HmacSha512::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac("secret", body, &signature));
        assert!(!verify_hmac("secret", b"tampered body", &signature));
        assert!(!verify_hmac("other-secret", body, &signature));
        assert!(!verify_hmac("secret", body, "not-hex"));
        assert!(!verify_hmac("", body, &signature));
    }
}
