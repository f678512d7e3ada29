//! SIP route registry
//!
//! Read-mostly projections fed by the platform's route manager. The
//! engine only consumes them for dialing and trunk mirroring; route
//! ownership stays with the platform.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::model::SipRoute;

#[derive(Clone)]
pub struct RouteStore {
    routes: Arc<DashMap<Uuid, SipRoute>>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(DashMap::new()),
        }
    }

    /// Insert or replace a route projection, preserving the original
    /// creation timestamp on replace.
    pub fn upsert(&self, mut route: SipRoute) -> SipRoute {
        if let Some(existing) = self.routes.get(&route.id) {
            route.created_at = existing.created_at;
        }
        self.routes.insert(route.id, route.clone());
        route
    }

    pub fn remove(&self, id: Uuid) -> Option<SipRoute> {
        self.routes.remove(&id).map(|(_, route)| route)
    }

    pub fn get(&self, id: Uuid) -> Option<SipRoute> {
        self.routes.get(&id).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<SipRoute> {
        self.routes.iter().map(|r| r.clone()).collect()
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}
