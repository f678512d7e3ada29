//! Bridge service client
//!
//! Mirrors SIP route projections to the bridge service's trunk registry.
//! The bridge is a soft dependency: when unconfigured, the engine runs
//! without mirroring and callers see a logged no-op.

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::SipRoute;

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BridgeClient {
    /// Build the client when both base URL and token are configured.
    pub fn from_config(base_url: Option<&str>, token: Option<&str>) -> Option<Self> {
        match (base_url, token) {
            (Some(base_url), Some(token)) => Some(Self {
                http: reqwest::Client::new(),
                base_url: base_url.trim_end_matches('/').to_string(),
                token: token.to_string(),
            }),
            _ => {
                info!("Bridge service not configured, trunk mirroring disabled");
                None
            }
        }
    }

    /// Upsert the trunk projection for a route.
    pub async fn push_trunk(&self, route: &SipRoute) -> Result<()> {
        let payload = json!({
            "id": route.id,
            "name": route.name,
            "domain": route.domain,
            "outbound_uri": route.outbound_uri,
            "username": route.username,
            "password": route.password,
            "max_channels": route.max_channels,
            "active": route.active,
        });

        let response = self
            .http
            .put(format!("{}/api/trunks/{}", self.base_url, route.id))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Bridge(e.to_string()))?;

        if response.status().is_success() {
            info!(route_id = %route.id, "Trunk pushed to bridge");
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(route_id = %route.id, status, "Bridge rejected trunk push");
            Err(Error::Bridge(format!("trunk push failed: {} {}", status, body)))
        }
    }

    /// Remove the trunk for a deleted route. A missing trunk counts as
    /// removed.
    pub async fn remove_trunk(&self, route_id: Uuid) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/api/trunks/{}", self.base_url, route_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Bridge(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            info!(route_id = %route_id, "Trunk removed from bridge");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Bridge(format!(
                "trunk removal failed: {} {}",
                status.as_u16(),
                body
            )))
        }
    }
}
