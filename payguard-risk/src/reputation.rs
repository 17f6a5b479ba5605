//! Vendor URL reputation via a threat-intel lookup API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Uri};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use payguard_egress::{build_https_client, HttpsClient};
use payguard_resilience::{BreakerError, CircuitBreaker};
use payguard_store::KvStore;

use crate::error::{RiskError, RiskResult};
use crate::verdict::{
    ReputationVerdict, TAG_INFRA_API_ERROR, TAG_INFRA_CIRCUIT_OPEN, TAG_INFRA_TIMEOUT,
};

/// Threat categories submitted with every lookup.
const THREAT_TYPES: [&str; 4] = [
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];

const CLIENT_ID: &str = "payguard";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cached verdicts live at most this long regardless of the service TTL.
const MAX_CACHE_TTL_SECS: u64 = 300;

/// Trait implemented by reputation evaluators.
///
/// Evaluation is infallible by design: every failure path collapses into a
/// fail-closed verdict carrying a synthetic infrastructure tag.
#[async_trait]
pub trait ReputationEvaluator: Send + Sync {
    /// Screens a vendor URL against threat intelligence.
    async fn evaluate(&self, url: &str) -> ReputationVerdict;
}

/// Configuration for the threat-intel client.
#[derive(Clone)]
pub struct ThreatIntelConfig {
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl fmt::Debug for ThreatIntelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatIntelConfig")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ThreatIntelConfig {
    /// Creates a configuration with the supplied API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: "https://safebrowsing.googleapis.com/v4/threatMatches:find".to_owned(),
            timeout: Duration::from_secs(2),
        }
    }

    /// Overrides the lookup endpoint.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reputation evaluator backed by the threat-intel API with substrate
/// caching and a dedicated circuit breaker.
pub struct ThreatIntelEvaluator {
    client: HttpsClient,
    config: ThreatIntelConfig,
    cache: Arc<KvStore>,
    breaker: Arc<CircuitBreaker>,
}

impl fmt::Debug for ThreatIntelEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatIntelEvaluator")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

impl ThreatIntelEvaluator {
    /// Creates an evaluator on the supplied cache and breaker.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Configuration`] when the API key is empty.
    pub fn new(
        config: ThreatIntelConfig,
        cache: Arc<KvStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> RiskResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RiskError::configuration("threat-intel API key is required"));
        }
        Ok(Self {
            client: build_https_client(),
            config,
            cache,
            breaker,
        })
    }

    fn cache_key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("reputation:{}", hex::encode(digest))
    }

    async fn lookup(&self, url: &str) -> RiskResult<LookupResponse> {
        let uri = format!("{}?key={}", self.config.api_url, self.config.api_key)
            .parse::<Uri>()
            .map_err(|err| RiskError::configuration(format!("invalid lookup uri: {err}")))?;

        let body = json!({
            "client": { "clientId": CLIENT_ID, "clientVersion": CLIENT_VERSION },
            "threatInfo": {
                "threatTypes": THREAT_TYPES,
                "platformTypes": ["ANY_PLATFORM"],
                "threatEntryTypes": ["URL"],
                "threatEntries": [{ "url": url }],
            },
        })
        .to_string();

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| RiskError::transport(err.to_string()))?;

        let response = timeout(self.config.timeout, self.client.request(request))
            .await
            .map_err(|_| RiskError::Timeout {
                timeout: self.config.timeout,
            })?
            .map_err(|err| RiskError::transport(err.to_string()))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| RiskError::response(err.to_string()))?;
        if !status.is_success() {
            return Err(RiskError::response(format!(
                "threat intel returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        if bytes.is_empty() {
            return Ok(LookupResponse::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RiskError::response(format!("failed to decode lookup: {err}")))
    }
}

#[async_trait]
impl ReputationEvaluator for ThreatIntelEvaluator {
    async fn evaluate(&self, url: &str) -> ReputationVerdict {
        let url = url.trim();
        let key = Self::cache_key(url);

        if let Some(cached) = self.cache.get_string(&key) {
            if let Ok(verdict) = serde_json::from_str::<ReputationVerdict>(&cached) {
                debug!(url, "reputation cache hit");
                return verdict;
            }
        }

        let verdict = match self.breaker.call(self.lookup(url)).await {
            Ok(response) => {
                let ttl = response.cache_ttl_secs().min(MAX_CACHE_TTL_SECS);
                if response.matches.is_empty() {
                    info!(url, "vendor URL is safe");
                    ReputationVerdict::safe(url, ttl)
                } else {
                    let tags = response.threat_tags();
                    warn!(url, ?tags, "vendor URL flagged by threat intel");
                    ReputationVerdict::flagged(url, tags, ttl)
                }
            }
            Err(BreakerError::Open { name, .. }) => {
                warn!(url, circuit = %name, "reputation circuit open, failing closed");
                ReputationVerdict::fallback(url, TAG_INFRA_CIRCUIT_OPEN)
            }
            Err(BreakerError::Inner(RiskError::Timeout { timeout })) => {
                warn!(url, ?timeout, "reputation lookup timed out, failing closed");
                ReputationVerdict::fallback(url, TAG_INFRA_TIMEOUT)
            }
            Err(BreakerError::Inner(err)) => {
                warn!(url, error = %err, "reputation lookup failed, failing closed");
                ReputationVerdict::fallback(url, TAG_INFRA_API_ERROR)
            }
        };

        // Only fresh provider answers are cached; fallback verdicts must be
        // re-evaluated on the next request.
        if !verdict.is_from_fallback() && verdict.cache_ttl_secs() > 0 {
            if let Ok(encoded) = serde_json::to_string(&verdict) {
                self.cache
                    .set_string(&key, encoded, Duration::from_secs(verdict.cache_ttl_secs()));
            }
        }

        verdict
    }
}

#[derive(Debug, Default, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    matches: Vec<ThreatMatch>,
}

impl LookupResponse {
    fn threat_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .matches
            .iter()
            .map(|m| m.threat_type.clone())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    fn cache_ttl_secs(&self) -> u64 {
        self.matches
            .iter()
            .filter_map(|m| m.cache_duration.as_deref())
            .filter_map(parse_duration_secs)
            .max()
            .unwrap_or(MAX_CACHE_TTL_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct ThreatMatch {
    #[serde(rename = "threatType")]
    threat_type: String,
    #[serde(rename = "cacheDuration")]
    cache_duration: Option<String>,
}

/// Parses service durations of the form `"300s"` or `"300.5s"`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_duration_secs(raw: &str) -> Option<u64> {
    let trimmed = raw.strip_suffix('s').unwrap_or(raw);
    trimmed.parse::<f64>().ok().map(|secs| secs.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_durations() {
        assert_eq!(parse_duration_secs("300s"), Some(300));
        assert_eq!(parse_duration_secs("299.5s"), Some(299));
        assert_eq!(parse_duration_secs("garbage"), None);
    }

    #[test]
    fn lookup_response_extracts_unique_tags() {
        let response: LookupResponse = serde_json::from_str(
            r#"{"matches":[
                {"threatType":"MALWARE","cacheDuration":"300s"},
                {"threatType":"MALWARE","cacheDuration":"100s"},
                {"threatType":"SOCIAL_ENGINEERING"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(response.threat_tags(), ["MALWARE", "SOCIAL_ENGINEERING"]);
        assert_eq!(response.cache_ttl_secs(), 300);
    }

    #[test]
    fn empty_response_is_safe_with_default_ttl() {
        let response = LookupResponse::default();
        assert!(response.matches.is_empty());
        assert_eq!(response.cache_ttl_secs(), MAX_CACHE_TTL_SECS);
    }

    #[test]
    fn cache_key_is_stable_hash() {
        let a = ThreatIntelEvaluator::cache_key("https://vendor.example");
        let b = ThreatIntelEvaluator::cache_key("https://vendor.example");
        let c = ThreatIntelEvaluator::cache_key("https://other.example");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("reputation:"));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let cache = Arc::new(KvStore::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "threat-intel",
            payguard_resilience::BreakerConfig::default(),
        ));
        let err = ThreatIntelEvaluator::new(ThreatIntelConfig::new("  "), cache, breaker)
            .expect_err("empty key");
        assert!(matches!(err, RiskError::Configuration { .. }));
    }
}
