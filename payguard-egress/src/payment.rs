//! Payment-backend action client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hyper::body::to_bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Method, Request, Uri};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use payguard_primitives::PayoutId;
use payguard_resilience::{BreakerError, CircuitBreaker};

use crate::http_client::{build_https_client, HttpsClient};
use crate::traits::{EgressError, EgressResult, PaymentActions, QueuedPayout};

/// Configuration for the payment-backend client.
#[derive(Clone)]
pub struct PaymentClientConfig {
    key_id: String,
    key_secret: String,
    base_url: String,
    account_number: Option<String>,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl fmt::Debug for PaymentClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentClientConfig")
            .field("key_id", &self.key_id)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PaymentClientConfig {
    /// Creates a configuration with the supplied API credentials.
    #[must_use]
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            base_url: "https://api.payments.example/v1".to_owned(),
            account_number: None,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Overrides the base URL used for API calls.
    ///
    /// # Errors
    ///
    /// Returns [`EgressError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> EgressResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref())?;
        Ok(self)
    }

    /// Sets the account number used when listing queued payouts.
    #[must_use]
    pub fn with_account_number(mut self, account: impl Into<String>) -> Self {
        self.account_number = Some(account.into());
        self
    }

    /// Sets the per-attempt request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tunes the retry schedule for 5xx/transport failures.
    #[must_use]
    pub const fn with_retry_schedule(
        mut self,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }
}

/// Payment-backend client speaking the queued/approve/cancel pull contract.
pub struct PaymentClient {
    client: HttpsClient,
    config: PaymentClientConfig,
    auth_header: String,
    breaker: Arc<CircuitBreaker>,
}

impl fmt::Debug for PaymentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl PaymentClient {
    /// Creates a client guarded by the supplied breaker.
    ///
    /// # Errors
    ///
    /// Returns [`EgressError::Configuration`] when credentials are empty.
    pub fn new(config: PaymentClientConfig, breaker: Arc<CircuitBreaker>) -> EgressResult<Self> {
        if config.key_id.is_empty() || config.key_secret.is_empty() {
            return Err(EgressError::configuration(
                "payment backend credentials are required",
            ));
        }
        let auth_header = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", config.key_id, config.key_secret))
        );
        Ok(Self {
            client: build_https_client(),
            config,
            auth_header,
            breaker,
        })
    }

    async fn execute(&self, operation: &str, request: Request<Body>) -> EgressResult<Vec<u8>> {
        let response = timeout(self.config.timeout, self.client.request(request))
            .await
            .map_err(|_| EgressError::Timeout {
                timeout: self.config.timeout,
            })?
            .map_err(|err| EgressError::transport(err.to_string()))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| EgressError::response(err.to_string()))?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let reason = String::from_utf8_lossy(&bytes).into_owned();
        if status.is_server_error() {
            Err(EgressError::Server {
                status: status.as_u16(),
                reason,
            })
        } else {
            warn!(operation, status = status.as_u16(), "payment backend rejected call");
            Err(EgressError::Client {
                status: status.as_u16(),
                reason,
            })
        }
    }

    /// Runs one operation with bounded exponential backoff, then records the
    /// outcome on the breaker. 4xx responses abort immediately.
    async fn call_with_retry<B>(&self, operation: &str, build: B) -> EgressResult<Vec<u8>>
    where
        B: Fn() -> EgressResult<Request<Body>>,
    {
        let attempt_sequence = async {
            let mut delay = self.config.base_delay;
            let mut last_error = None;

            for attempt in 1..=self.config.max_retries {
                let request = build()?;
                match self.execute(operation, request).await {
                    Ok(bytes) => {
                        if attempt > 1 {
                            info!(operation, attempt, "payment call recovered after retry");
                        }
                        return Ok(bytes);
                    }
                    Err(err) if err.is_retriable() && attempt < self.config.max_retries => {
                        warn!(
                            operation,
                            attempt,
                            error = %err,
                            retry_in = ?delay,
                            "payment call failed, retrying"
                        );
                        last_error = Some(err);
                        sleep(delay).await;
                        delay = (delay * 2).min(self.config.max_delay);
                    }
                    Err(err) => return Err(err),
                }
            }

            Err(last_error
                .unwrap_or_else(|| EgressError::transport("retry budget exhausted")))
        };

        self.breaker
            .call(attempt_sequence)
            .await
            .map_err(|err| match err {
                BreakerError::Open { name, .. } => EgressError::CircuitOpen { name },
                BreakerError::Inner(inner) => inner,
            })
    }

    fn uri(&self, path_and_query: &str) -> EgressResult<Uri> {
        format!("{}{path_and_query}", self.config.base_url)
            .parse::<Uri>()
            .map_err(|err| EgressError::configuration(format!("invalid request uri: {err}")))
    }

    fn request(&self, method: Method, uri: Uri, body: Body) -> EgressResult<Request<Body>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, self.auth_header.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|err| EgressError::transport(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct PayoutListing {
    #[serde(default)]
    items: Vec<QueuedPayout>,
}

#[async_trait]
impl PaymentActions for PaymentClient {
    async fn list_queued(&self) -> EgressResult<Vec<QueuedPayout>> {
        let account = self.config.account_number.as_deref().ok_or_else(|| {
            EgressError::configuration("account number is required for pull-mode listing")
        })?;
        let uri = self.uri(&format!(
            "/payouts?account_number={account}&status=queued&count=100"
        ))?;

        let bytes = self
            .call_with_retry("list_queued", || {
                self.request(Method::GET, uri.clone(), Body::empty())
            })
            .await?;

        let listing: PayoutListing = serde_json::from_slice(&bytes)
            .map_err(|err| EgressError::response(format!("failed to decode listing: {err}")))?;
        Ok(listing.items)
    }

    async fn approve(&self, payout_id: &PayoutId) -> EgressResult<()> {
        let uri = self.uri(&format!("/payouts/{payout_id}/approve"))?;
        self.call_with_retry("approve", || {
            self.request(Method::POST, uri.clone(), Body::empty())
        })
        .await?;
        info!(payout_id = %payout_id, "payout approved on backend");
        Ok(())
    }

    async fn cancel(&self, payout_id: &PayoutId, reason: &str) -> EgressResult<()> {
        let uri = self.uri(&format!("/payouts/{payout_id}/cancel"))?;
        let body = json!({ "reason": reason }).to_string();
        self.call_with_retry("cancel", || {
            self.request(Method::POST, uri.clone(), Body::from(body.clone()))
        })
        .await?;
        info!(payout_id = %payout_id, reason, "payout cancelled on backend");
        Ok(())
    }
}

fn sanitize_base_url(input: &str) -> EgressResult<String> {
    let mut base = input.trim().trim_end_matches('/').to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(EgressError::configuration(
            "payment base URL must start with http:// or https://",
        ));
    }
    base.parse::<Uri>()
        .map_err(|err| EgressError::configuration(format!("invalid payment base URL: {err}")))?;
    if base.is_empty() {
        return Err(EgressError::configuration("payment base URL is empty"));
    }
    Ok(base)
}
