//! Ledger Service
//!
//! Prepaid balance management in integer cents. Every balance change
//! appends a BalanceAdjustment while the account entry is still locked,
//! so the balance and its history can never drift apart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Balance below which debits log a warning
const LOW_BALANCE_WARN_CENTS: i64 = 100;

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Credit,
    Debit,
}

/// What produced a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdjustmentSource {
    Admin,
    Topup,
    Call,
}

/// Prepaid account, one per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one balance change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: AdjustmentKind,
    pub amount_cents: i64,
    pub source: AdjustmentSource,
    pub reason: String,
    /// External correlation id (order id, session id)
    pub reference_id: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LedgerService {
    /// Account storage
    accounts: Arc<DashMap<Uuid, Account>>,
    /// Adjustment history
    // lock order: accounts before adjustments
    adjustments: Arc<DashMap<Uuid, Vec<BalanceAdjustment>>>,
}

impl LedgerService {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            adjustments: Arc::new(DashMap::new()),
        }
    }

    /// Open an account. Re-opening an existing account returns it
    /// unchanged; the initial balance only applies on first creation.
    pub fn open_account(&self, user_id: Uuid, initial_cents: i64) -> Result<Account> {
        if let Some(existing) = self.accounts.get(&user_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let account = Account {
            user_id,
            balance_cents: 0,
            created_at: now,
            updated_at: now,
        };
        self.accounts.insert(user_id, account.clone());
        self.adjustments.insert(user_id, Vec::new());

        if initial_cents > 0 {
            self.credit(
                user_id,
                initial_cents,
                AdjustmentSource::Admin,
                "Initial deposit",
                None,
            )?;
        }

        self.account(user_id).ok_or(Error::AccountNotFound(user_id))
    }

    pub fn account(&self, user_id: Uuid) -> Option<Account> {
        self.accounts.get(&user_id).map(|a| a.clone())
    }

    /// Current balance in cents
    pub fn balance(&self, user_id: Uuid) -> Result<i64> {
        self.accounts
            .get(&user_id)
            .map(|a| a.balance_cents)
            .ok_or(Error::AccountNotFound(user_id))
    }

    /// Credit an account (add funds)
    pub fn credit(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        source: AdjustmentSource,
        reason: &str,
        reference_id: Option<String>,
    ) -> Result<i64> {
        if amount_cents <= 0 {
            return Err(Error::InvalidRequest(
                "credit amount must be positive".to_string(),
            ));
        }

        let mut account = self
            .accounts
            .get_mut(&user_id)
            .ok_or(Error::AccountNotFound(user_id))?;

        let balance_before = account.balance_cents;
        account.balance_cents += amount_cents;
        account.updated_at = Utc::now();
        let balance_after = account.balance_cents;

        // Appended before the entry lock is released
        self.record_adjustment(
            user_id,
            AdjustmentKind::Credit,
            amount_cents,
            source,
            reason,
            reference_id,
            balance_before,
            balance_after,
        );
        drop(account);

        Ok(balance_after)
    }

    /// Debit an account (deduct funds). Fails without any write if the
    /// debit would drive the balance negative.
    pub fn debit(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        source: AdjustmentSource,
        reason: &str,
        reference_id: Option<String>,
    ) -> Result<i64> {
        if amount_cents <= 0 {
            return Err(Error::InvalidRequest(
                "debit amount must be positive".to_string(),
            ));
        }

        let mut account = self
            .accounts
            .get_mut(&user_id)
            .ok_or(Error::AccountNotFound(user_id))?;

        if amount_cents > account.balance_cents {
            return Err(Error::InsufficientBalance {
                required_cents: amount_cents,
                shortfall_cents: amount_cents - account.balance_cents,
            });
        }

        let balance_before = account.balance_cents;
        account.balance_cents -= amount_cents;
        account.updated_at = Utc::now();
        let balance_after = account.balance_cents;

        if balance_after < LOW_BALANCE_WARN_CENTS {
            tracing::warn!(
                user_id = %user_id,
                balance_cents = balance_after,
                "Low balance"
            );
        }

        self.record_adjustment(
            user_id,
            AdjustmentKind::Debit,
            amount_cents,
            source,
            reason,
            reference_id,
            balance_before,
            balance_after,
        );
        drop(account);

        Ok(balance_after)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_adjustment(
        &self,
        user_id: Uuid,
        kind: AdjustmentKind,
        amount_cents: i64,
        source: AdjustmentSource,
        reason: &str,
        reference_id: Option<String>,
        balance_before: i64,
        balance_after: i64,
    ) {
        let adjustment = BalanceAdjustment {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount_cents,
            source,
            reason: reason.to_string(),
            reference_id,
            balance_before,
            balance_after,
            created_at: Utc::now(),
        };

        self.adjustments
            .entry(user_id)
            .or_default()
            .push(adjustment);
    }

    /// Adjustment history, newest first
    pub fn adjustments(&self, user_id: Uuid, limit: usize) -> Vec<BalanceAdjustment> {
        self.adjustments
            .get(&user_id)
            .map(|adj| adj.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for LedgerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_and_debit_update_balance_and_history() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 0).unwrap();

        ledger
            .credit(user, 500, AdjustmentSource::Topup, "top-up", None)
            .unwrap();
        ledger
            .debit(user, 120, AdjustmentSource::Call, "call settlement", None)
            .unwrap();

        assert_eq!(ledger.balance(user).unwrap(), 380);
        let history = ledger.adjustments(user, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, AdjustmentKind::Debit);
        assert_eq!(history[0].balance_after, 380);
        assert_eq!(history[1].source, AdjustmentSource::Topup);
    }

    #[test]
    fn debit_never_drives_balance_negative() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 100).unwrap();

        let err = ledger
            .debit(user, 150, AdjustmentSource::Call, "too much", None)
            .unwrap_err();
        match err {
            Error::InsufficientBalance {
                required_cents,
                shortfall_cents,
            } => {
                assert_eq!(required_cents, 150);
                assert_eq!(shortfall_cents, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Aborted debit leaves no trace
        assert_eq!(ledger.balance(user).unwrap(), 100);
        assert_eq!(ledger.adjustments(user, 10).len(), 1);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 0).unwrap();

        assert!(ledger
            .credit(user, 0, AdjustmentSource::Admin, "zero", None)
            .is_err());
        assert!(ledger
            .debit(user, -5, AdjustmentSource::Admin, "negative", None)
            .is_err());
    }

    #[test]
    fn reopening_an_account_is_idempotent() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 250).unwrap();
        let again = ledger.open_account(user, 9_999).unwrap();
        assert_eq!(again.balance_cents, 250);
    }

    #[test]
    fn concurrent_operations_keep_the_signed_sum_invariant() {
        let ledger = LedgerService::new();
        let user = Uuid::new_v4();
        ledger.open_account(user, 10_000).unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let ledger = ledger.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            let _ = ledger.credit(
                                user,
                                7,
                                AdjustmentSource::Topup,
                                "concurrent credit",
                                None,
                            );
                        } else {
                            let _ = ledger.debit(
                                user,
                                11,
                                AdjustmentSource::Call,
                                "concurrent debit",
                                None,
                            );
                        }
                    }
                });
            }
        });

        let balance = ledger.balance(user).unwrap();
        assert!(balance >= 0);

        let history = ledger.adjustments(user, usize::MAX);
        let signed_sum: i64 = history
            .iter()
            .map(|a| match a.kind {
                AdjustmentKind::Credit => a.amount_cents,
                AdjustmentKind::Debit => -a.amount_cents,
            })
            .sum();
        // History includes the opening deposit
        assert_eq!(balance, signed_sum);
    }
}
