//! Cached threat-intel verdicts.

use serde::{Deserialize, Serialize};

/// Synthetic tag for a threat-intel request timeout.
pub const TAG_INFRA_TIMEOUT: &str = "INFRA_TIMEOUT";
/// Synthetic tag for a threat-intel transport or API error.
pub const TAG_INFRA_API_ERROR: &str = "INFRA_API_ERROR";
/// Synthetic tag emitted when the threat-intel circuit is open.
pub const TAG_INFRA_CIRCUIT_OPEN: &str = "INFRA_CIRCUIT_OPEN";

/// Returns `true` for synthetic tags describing an infrastructure failure
/// rather than a real threat match. Audit readers and dashboards use this
/// to keep the two apart.
#[must_use]
pub fn is_infrastructure_tag(tag: &str) -> bool {
    tag.starts_with("INFRA_")
}

/// Outcome of a vendor URL reputation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationVerdict {
    url: String,
    safe: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    threat_tags: Vec<String>,
    cache_ttl_secs: u64,
    #[serde(default)]
    from_fallback: bool,
}

impl ReputationVerdict {
    /// Verdict for a URL with no threat matches.
    #[must_use]
    pub fn safe(url: impl Into<String>, cache_ttl_secs: u64) -> Self {
        Self {
            url: url.into(),
            safe: true,
            threat_tags: Vec::new(),
            cache_ttl_secs,
            from_fallback: false,
        }
    }

    /// Verdict for a URL with one or more threat matches.
    #[must_use]
    pub fn flagged(url: impl Into<String>, threat_tags: Vec<String>, cache_ttl_secs: u64) -> Self {
        Self {
            url: url.into(),
            safe: false,
            threat_tags,
            cache_ttl_secs,
            from_fallback: false,
        }
    }

    /// Fail-closed verdict produced when the check itself failed.
    ///
    /// Never cached, and tagged so audit can distinguish it from a match.
    #[must_use]
    pub fn fallback(url: impl Into<String>, infra_tag: &str) -> Self {
        Self {
            url: url.into(),
            safe: false,
            threat_tags: vec![infra_tag.to_owned()],
            cache_ttl_secs: 0,
            from_fallback: true,
        }
    }

    /// Returns the checked URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `true` when the URL cleared the threat check.
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        self.safe
    }

    /// Returns the threat tags (real matches or synthetic infra tags).
    #[must_use]
    pub fn threat_tags(&self) -> &[String] {
        &self.threat_tags
    }

    /// Returns the service-supplied cache TTL in seconds.
    #[must_use]
    pub const fn cache_ttl_secs(&self) -> u64 {
        self.cache_ttl_secs
    }

    /// Returns `true` when this verdict came from a fail-closed fallback
    /// path rather than a fresh provider answer.
    #[must_use]
    pub const fn is_from_fallback(&self) -> bool {
        self.from_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_tags_are_distinguishable() {
        assert!(is_infrastructure_tag(TAG_INFRA_TIMEOUT));
        assert!(is_infrastructure_tag(TAG_INFRA_CIRCUIT_OPEN));
        assert!(!is_infrastructure_tag("MALWARE"));
        assert!(!is_infrastructure_tag("SOCIAL_ENGINEERING"));
    }

    #[test]
    fn fallback_verdicts_are_unsafe_and_uncached() {
        let verdict = ReputationVerdict::fallback("https://vendor.example", TAG_INFRA_TIMEOUT);
        assert!(!verdict.is_safe());
        assert!(verdict.is_from_fallback());
        assert_eq!(verdict.threat_tags(), [TAG_INFRA_TIMEOUT]);
        assert_eq!(verdict.cache_ttl_secs(), 0);
    }
}
