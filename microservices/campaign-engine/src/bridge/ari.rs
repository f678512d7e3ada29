//! Signaling provider REST client
//!
//! Originates channels with `POST /channels`. The provider answers with
//! the created channel id; everything after that arrives as events on the
//! engine's event ingress. The client never retries on its own.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Origination, OriginateRequest, Originator, ProviderError, ProviderResult};
use crate::config::Config;
use crate::model::SipRoute;

/// Ring timeouts below this starve the callee of ring time
const MIN_RING_TIMEOUT_SECS: u32 = 5;

pub struct AriClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    app: String,
    default_timeout_secs: u32,
}

impl AriClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.ari_base_url.trim_end_matches('/').to_string(),
            username: config.ari_username.clone(),
            password: config.ari_password.clone(),
            app: config.ari_app.clone(),
            default_timeout_secs: config.ari_timeout_secs,
        }
    }

    /// Resolve the dial endpoint for a route and number.
    ///
    /// Precedence: the route's dial-endpoint template, then its outbound
    /// URI (both substitute a `{number}` token), then domain
    /// concatenation for domains already carrying a dial prefix, then a
    /// synthesized per-route default.
    pub fn resolve_endpoint(route: &SipRoute, number: &str) -> String {
        if let Some(template) = &route.overrides.dial_endpoint {
            return template.replace("{number}", number);
        }

        if let Some(uri) = &route.outbound_uri {
            return uri.replace("{number}", number);
        }

        if let Some(domain) = &route.domain {
            if domain.contains('/') {
                return if domain.ends_with('/') {
                    format!("{}{}", domain, number)
                } else {
                    format!("{}/{}", domain, number)
                };
            }
        }

        format!("PJSIP/{}@trunk-{}", number, route.id.simple())
    }

    fn clamp_timeout(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .max(MIN_RING_TIMEOUT_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct ChannelCreated {
    id: String,
}

#[async_trait]
impl Originator for AriClient {
    async fn originate(&self, request: &OriginateRequest) -> ProviderResult<Origination> {
        let endpoint = Self::resolve_endpoint(&request.route, &request.dial_number);
        let timeout = self.clamp_timeout(request.timeout_secs);

        let mut query: Vec<(&str, String)> = vec![
            ("endpoint", endpoint.clone()),
            ("callerId", request.caller_id.clone()),
            ("timeout", timeout.to_string()),
            ("app", self.app.clone()),
        ];
        if !request.app_args.is_empty() {
            query.push(("appArgs", request.app_args.join(",")));
        }
        for (key, value) in &request.variables {
            query.push(("variables", format!("{}={}", key, value)));
        }

        debug!(endpoint = %endpoint, timeout, "Originating channel");

        let response = self
            .http
            .post(format!("{}/channels", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if response.status().is_success() {
            let created: ChannelCreated = response
                .json()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            Ok(Origination {
                channel_id: created.id,
            })
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Status { status, body })
        }
    }
}
