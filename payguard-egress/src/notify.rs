//! Push-notification transport for held payouts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Method, Request, Uri};
use serde_json::json;
use tokio::time::timeout;
use tracing::info;

use payguard_resilience::{BreakerError, CircuitBreaker};

use crate::http_client::{build_https_client, HttpsClient};
use crate::traits::{EgressError, EgressResult, HeldSummary, Notifier};

/// Configuration for the push-notification transport.
#[derive(Clone)]
pub struct PushNotifierConfig {
    topic: String,
    server_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for PushNotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushNotifierConfig")
            .field("topic", &self.topic)
            .field("server_url", &self.server_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PushNotifierConfig {
    /// Creates a configuration publishing to the supplied topic.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            server_url: "https://ntfy.sh".to_owned(),
            auth_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Overrides the notification server base URL.
    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Supplies a bearer token for authenticated servers.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Notification transport publishing JSON messages to an ntfy-style server.
pub struct PushNotifier {
    client: HttpsClient,
    config: PushNotifierConfig,
    breaker: Arc<CircuitBreaker>,
}

impl fmt::Debug for PushNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushNotifier")
            .field("topic", &self.config.topic)
            .finish_non_exhaustive()
    }
}

impl PushNotifier {
    /// Creates a notifier guarded by the supplied breaker.
    ///
    /// # Errors
    ///
    /// Returns [`EgressError::Configuration`] when the topic is empty.
    pub fn new(config: PushNotifierConfig, breaker: Arc<CircuitBreaker>) -> EgressResult<Self> {
        if config.topic.trim().is_empty() {
            return Err(EgressError::configuration(
                "notification topic is required",
            ));
        }
        Ok(Self {
            client: build_https_client(),
            config,
            breaker,
        })
    }

    async fn publish(&self, payload: String) -> EgressResult<()> {
        let uri = self
            .config
            .server_url
            .parse::<Uri>()
            .map_err(|err| EgressError::configuration(format!("invalid notify server: {err}")))?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Body::from(payload))
            .map_err(|err| EgressError::transport(err.to_string()))?;

        let response = timeout(self.config.timeout, self.client.request(request))
            .await
            .map_err(|_| EgressError::Timeout {
                timeout: self.config.timeout,
            })?
            .map_err(|err| EgressError::transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| EgressError::response(err.to_string()))?;
        let reason = String::from_utf8_lossy(&bytes).into_owned();
        if status.is_server_error() {
            Err(EgressError::Server {
                status: status.as_u16(),
                reason,
            })
        } else {
            Err(EgressError::Client {
                status: status.as_u16(),
                reason,
            })
        }
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn notify(&self, summary: &HeldSummary) -> EgressResult<()> {
        let payload = json!({
            "topic": self.config.topic,
            "title": "Payout held for approval",
            "message": format!(
                "Agent {} payout {} of {} {} requires approval: {}",
                summary.agent_id,
                summary.payout_id,
                summary.amount,
                summary.currency,
                summary.reason_detail,
            ),
            "priority": 4,
            "tags": ["moneybag", "warning"],
        })
        .to_string();

        self.breaker
            .call(self.publish(payload))
            .await
            .map_err(|err| match err {
                BreakerError::Open { name, .. } => EgressError::CircuitOpen { name },
                BreakerError::Inner(inner) => inner,
            })?;

        info!(payout_id = %summary.payout_id, "held-payout notification dispatched");
        Ok(())
    }
}
