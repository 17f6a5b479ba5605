//! Advisory legal-entity verification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::{Body, Method, Request, Uri};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use payguard_egress::{build_https_client, HttpsClient};
use payguard_resilience::{BreakerError, CircuitBreaker};
use payguard_store::KvStore;

use crate::error::{RiskError, RiskResult};

/// Identity reports are cached for an hour; registry data changes slowly.
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Result of a legal-entity lookup.
///
/// Purely advisory: `verified == false` (or a populated `error`) never
/// flips a governance decision, it only enriches audit detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityReport {
    /// The name or identifier that was queried.
    pub query: String,
    /// Whether an active, issued registration was found.
    pub verified: bool,
    /// Registered legal name of the best match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_name: Option<String>,
    /// Jurisdiction of the best match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    /// Registry status of the best match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Populated when the lookup itself failed (fail-open).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IdentityReport {
    fn unknown(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            verified: false,
            legal_name: None,
            jurisdiction: None,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Trait implemented by identity verifiers.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Looks up a vendor by display name.
    async fn verify(&self, name: &str) -> IdentityReport;
}

/// Configuration for the legal-entity registry client.
#[derive(Debug, Clone)]
pub struct LegalEntityConfig {
    api_url: String,
    timeout: Duration,
}

impl LegalEntityConfig {
    /// Creates a configuration against the public registry endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_url: "https://api.gleif.org/api/v1/lei-records".to_owned(),
            timeout: Duration::from_secs(2),
        }
    }

    /// Overrides the registry endpoint.
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

impl Default for LegalEntityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry client with substrate caching and its own breaker.
pub struct LegalEntityClient {
    client: HttpsClient,
    config: LegalEntityConfig,
    cache: Arc<KvStore>,
    breaker: Arc<CircuitBreaker>,
}

impl fmt::Debug for LegalEntityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegalEntityClient")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

impl LegalEntityClient {
    /// Creates a client on the supplied cache and breaker.
    #[must_use]
    pub fn new(
        config: LegalEntityConfig,
        cache: Arc<KvStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client: build_https_client(),
            config,
            cache,
            breaker,
        }
    }

    async fn search(&self, name: &str) -> RiskResult<IdentityReport> {
        let uri = format!(
            "{}?filter[entity.legalName]={}&page[size]=5",
            self.config.api_url,
            encode_query(name)
        )
        .parse::<Uri>()
        .map_err(|err| RiskError::configuration(format!("invalid registry uri: {err}")))?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
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
                "registry returned {status}"
            )));
        }

        let listing: RecordListing = serde_json::from_slice(&bytes)
            .map_err(|err| RiskError::response(format!("failed to decode registry: {err}")))?;
        Ok(listing.into_report(name))
    }
}

#[async_trait]
impl IdentityVerifier for LegalEntityClient {
    async fn verify(&self, name: &str) -> IdentityReport {
        let name = name.trim();
        if name.is_empty() {
            return IdentityReport::unknown(name, "empty entity name");
        }

        let key = format!("identity:{}", name.to_lowercase());
        if let Some(cached) = self.cache.get_string(&key) {
            if let Ok(report) = serde_json::from_str::<IdentityReport>(&cached) {
                debug!(name, "identity cache hit");
                return report;
            }
        }

        match self.breaker.call(self.search(name)).await {
            Ok(report) => {
                info!(name, verified = report.verified, "identity lookup complete");
                if let Ok(encoded) = serde_json::to_string(&report) {
                    self.cache.set_string(&key, encoded, CACHE_TTL);
                }
                report
            }
            Err(BreakerError::Open { name: circuit, .. }) => {
                warn!(name, circuit = %circuit, "identity circuit open, proceeding unverified");
                IdentityReport::unknown(name, "identity circuit open")
            }
            Err(BreakerError::Inner(err)) => {
                warn!(name, error = %err, "identity lookup failed, proceeding unverified");
                IdentityReport::unknown(name, err.to_string())
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordListing {
    #[serde(default)]
    data: Vec<RegistryRecord>,
}

impl RecordListing {
    fn into_report(self, query: &str) -> IdentityReport {
        let best = self
            .data
            .iter()
            .find(|record| record.is_active())
            .or_else(|| self.data.first());

        match best {
            Some(record) => IdentityReport {
                query: query.to_owned(),
                verified: record.is_active(),
                legal_name: record.legal_name(),
                jurisdiction: record.attributes.entity.jurisdiction.clone(),
                status: record.attributes.registration.status.clone(),
                error: None,
            },
            None => IdentityReport {
                query: query.to_owned(),
                verified: false,
                legal_name: None,
                jurisdiction: None,
                status: None,
                error: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryRecord {
    #[serde(default)]
    attributes: RecordAttributes,
}

impl RegistryRecord {
    fn is_active(&self) -> bool {
        self.attributes.entity.status.as_deref() == Some("ACTIVE")
            && self.attributes.registration.status.as_deref() == Some("ISSUED")
    }

    fn legal_name(&self) -> Option<String> {
        self.attributes.entity.legal_name.as_ref().map(|n| n.name.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordAttributes {
    #[serde(default)]
    entity: EntityAttributes,
    #[serde(default)]
    registration: RegistrationAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct EntityAttributes {
    #[serde(rename = "legalName")]
    legal_name: Option<LegalName>,
    jurisdiction: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegalName {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RegistrationAttributes {
    status: Option<String>,
}

/// Percent-encodes everything outside RFC 3986 unreserved characters.
fn encode_query(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_query_strings() {
        assert_eq!(encode_query("Acme Corp"), "Acme%20Corp");
        assert_eq!(encode_query("a&b=c"), "a%26b%3Dc");
        assert_eq!(encode_query("plain-name_1.2~"), "plain-name_1.2~");
    }

    #[test]
    fn active_issued_record_verifies() {
        let listing: RecordListing = serde_json::from_str(
            r#"{"data":[{"attributes":{
                "entity":{"legalName":{"name":"Acme Corp Ltd"},"jurisdiction":"GB","status":"ACTIVE"},
                "registration":{"status":"ISSUED"}
            }}]}"#,
        )
        .unwrap();
        let report = listing.into_report("Acme Corp");
        assert!(report.verified);
        assert_eq!(report.legal_name.as_deref(), Some("Acme Corp Ltd"));
        assert_eq!(report.jurisdiction.as_deref(), Some("GB"));
    }

    #[test]
    fn lapsed_record_does_not_verify() {
        let listing: RecordListing = serde_json::from_str(
            r#"{"data":[{"attributes":{
                "entity":{"legalName":{"name":"Ghost Ltd"},"status":"INACTIVE"},
                "registration":{"status":"LAPSED"}
            }}]}"#,
        )
        .unwrap();
        let report = listing.into_report("Ghost Ltd");
        assert!(!report.verified);
        assert_eq!(report.status.as_deref(), Some("LAPSED"));
        assert!(report.error.is_none());
    }

    #[test]
    fn empty_listing_is_unverified_without_error() {
        let report = RecordListing::default().into_report("Nobody Inc");
        assert!(!report.verified);
        assert!(report.error.is_none());
    }
}
