//! Admission control
//!
//! Two gates guard spending and capacity: a budget authorization when a
//! campaign starts (advisory, priced per dialable lead) and a per-call
//! gate enforcing the global channel ceiling, the route's channel
//! ceiling and a minimum cost headroom at dial time.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::LedgerService;
use crate::model::SipRoute;

/// Occupancy counter compared against a live limit at acquire time, so
/// route ceiling changes apply to the next call without rebuilds.
#[derive(Debug, Default)]
pub struct ChannelGauge {
    active: AtomicI64,
}

impl ChannelGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one slot if occupancy is below the limit. Lock-free
    /// compare-and-set, safe under arbitrary contention.
    pub fn try_acquire(&self, limit: i64) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < limit {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Release one slot. Never goes below zero.
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            });
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII permit holding one global and one per-route channel slot for the
/// lifetime of a call attempt. Dropping it releases both.
#[derive(Debug)]
pub struct CallPermit {
    global: Arc<ChannelGauge>,
    route: Arc<ChannelGauge>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.global.release();
        self.route.release();
    }
}

/// Why a call was not admitted
#[derive(Debug, thiserror::Error)]
pub enum AdmissionDenied {
    #[error("global channel ceiling reached")]
    GlobalCapacity,

    #[error("route {route_id} channel ceiling reached")]
    RouteCapacity { route_id: Uuid },

    #[error("route {route_id} is inactive")]
    RouteInactive { route_id: Uuid },

    #[error("balance {balance_cents} below one billed minute ({required_cents})")]
    CostHeadroom {
        required_cents: i64,
        balance_cents: i64,
    },

    #[error("no ledger account for owner")]
    AccountMissing,
}

#[derive(Clone)]
pub struct AdmissionController {
    ledger: LedgerService,
    global: Arc<ChannelGauge>,
    per_route: Arc<DashMap<Uuid, Arc<ChannelGauge>>>,
    global_limit: i64,
    lead_rate_cents: i64,
}

impl AdmissionController {
    pub fn new(ledger: LedgerService, global_limit: i64, lead_rate_cents: i64) -> Self {
        Self {
            ledger,
            global: Arc::new(ChannelGauge::new()),
            per_route: Arc::new(DashMap::new()),
            global_limit,
            lead_rate_cents,
        }
    }

    /// Authorize a campaign start: the owner's balance must cover every
    /// dialable lead at the per-lead rate. Advisory by design; actual
    /// spend is enforced per call and at settlement.
    pub fn authorize_start(&self, owner: Uuid, dialable_leads: usize) -> Result<i64> {
        if dialable_leads == 0 {
            return Err(Error::NoLeadsAvailable);
        }

        let required_cents = dialable_leads as i64 * self.lead_rate_cents;
        let balance_cents = self.ledger.balance(owner)?;
        if balance_cents < required_cents {
            return Err(Error::InsufficientBalance {
                required_cents,
                shortfall_cents: required_cents - balance_cents,
            });
        }
        Ok(required_cents)
    }

    /// Admit one call: route must be active, the owner must afford at
    /// least one billed minute, and both channel gauges must have room.
    pub fn try_admit(
        &self,
        route: &SipRoute,
        owner: Uuid,
    ) -> std::result::Result<CallPermit, AdmissionDenied> {
        if !route.active {
            return Err(AdmissionDenied::RouteInactive { route_id: route.id });
        }

        let balance_cents = self
            .ledger
            .balance(owner)
            .map_err(|_| AdmissionDenied::AccountMissing)?;
        if balance_cents < route.rate_cents_per_min {
            return Err(AdmissionDenied::CostHeadroom {
                required_cents: route.rate_cents_per_min,
                balance_cents,
            });
        }

        if !self.global.try_acquire(self.global_limit) {
            return Err(AdmissionDenied::GlobalCapacity);
        }

        let route_gauge = self.route_gauge(route.id);
        if !route_gauge.try_acquire(route.max_channels) {
            self.global.release();
            return Err(AdmissionDenied::RouteCapacity { route_id: route.id });
        }

        Ok(CallPermit {
            global: self.global.clone(),
            route: route_gauge,
        })
    }

    pub fn active_global(&self) -> i64 {
        self.global.active()
    }

    pub fn active_for_route(&self, route_id: Uuid) -> i64 {
        self.per_route
            .get(&route_id)
            .map(|g| g.active())
            .unwrap_or(0)
    }

    fn route_gauge(&self, route_id: Uuid) -> Arc<ChannelGauge> {
        self.per_route.entry(route_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RouteOverrides;
    use chrono::Utc;

    fn route(max_channels: i64, rate_cents_per_min: i64) -> SipRoute {
        let now = Utc::now();
        SipRoute {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            domain: None,
            outbound_uri: None,
            username: None,
            password: None,
            rate_cents_per_min,
            max_channels,
            active: true,
            overrides: RouteOverrides::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn controller(balance_cents: i64, global_limit: i64) -> (AdmissionController, Uuid) {
        let ledger = LedgerService::new();
        let owner = Uuid::new_v4();
        ledger.open_account(owner, balance_cents).unwrap();
        (
            AdmissionController::new(ledger, global_limit, 5),
            owner,
        )
    }

    #[test]
    fn start_authorization_prices_per_lead() {
        let (admission, owner) = controller(40, 10);
        let err = admission.authorize_start(owner, 10).unwrap_err();
        match err {
            Error::InsufficientBalance {
                required_cents,
                shortfall_cents,
            } => {
                assert_eq!(required_cents, 50);
                assert_eq!(shortfall_cents, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let (admission, owner) = controller(50, 10);
        assert_eq!(admission.authorize_start(owner, 10).unwrap(), 50);
    }

    #[test]
    fn start_without_leads_is_refused() {
        let (admission, owner) = controller(1_000, 10);
        assert!(matches!(
            admission.authorize_start(owner, 0),
            Err(Error::NoLeadsAvailable)
        ));
    }

    #[test]
    fn gauge_admits_exactly_the_limit_under_contention() {
        let gauge = Arc::new(ChannelGauge::new());
        let admitted = Arc::new(AtomicI64::new(0));

        std::thread::scope(|s| {
            for _ in 0..64 {
                let gauge = gauge.clone();
                let admitted = admitted.clone();
                s.spawn(move || {
                    if gauge.try_acquire(10) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 10);
        assert_eq!(gauge.active(), 10);
    }

    #[test]
    fn permit_drop_releases_both_gauges() {
        let (admission, owner) = controller(1_000, 2);
        let r = route(2, 10);

        let permit = admission.try_admit(&r, owner).unwrap();
        assert_eq!(admission.active_global(), 1);
        assert_eq!(admission.active_for_route(r.id), 1);

        drop(permit);
        assert_eq!(admission.active_global(), 0);
        assert_eq!(admission.active_for_route(r.id), 0);
    }

    #[test]
    fn route_ceiling_denial_returns_the_global_slot() {
        let (admission, owner) = controller(1_000, 10);
        let r = route(1, 10);

        let _held = admission.try_admit(&r, owner).unwrap();
        assert!(matches!(
            admission.try_admit(&r, owner),
            Err(AdmissionDenied::RouteCapacity { .. })
        ));
        // The failed attempt must not leak a global slot
        assert_eq!(admission.active_global(), 1);
    }

    #[test]
    fn global_ceiling_applies_across_routes() {
        let (admission, owner) = controller(1_000, 1);
        let r1 = route(5, 10);
        let r2 = route(5, 10);

        let _held = admission.try_admit(&r1, owner).unwrap();
        assert!(matches!(
            admission.try_admit(&r2, owner),
            Err(AdmissionDenied::GlobalCapacity)
        ));
    }

    #[test]
    fn cost_headroom_requires_one_billed_minute() {
        let (admission, owner) = controller(5, 10);
        let r = route(5, 10);
        assert!(matches!(
            admission.try_admit(&r, owner),
            Err(AdmissionDenied::CostHeadroom { .. })
        ));
    }

    #[test]
    fn inactive_routes_are_denied() {
        let (admission, owner) = controller(1_000, 10);
        let mut r = route(5, 10);
        r.active = false;
        assert!(matches!(
            admission.try_admit(&r, owner),
            Err(AdmissionDenied::RouteInactive { .. })
        ));
    }
}
