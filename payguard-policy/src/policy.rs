//! The per-agent governance policy type.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use payguard_primitives::AgentId;

/// Errors raised while validating a policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyValidationError {
    /// A cap was negative.
    #[error("policy caps must be non-negative: {field} = {value}")]
    NegativeCap {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: i64,
    },
    /// The per-transaction cap exceeds the daily cap.
    #[error("per-transaction cap {per_txn} exceeds daily cap {daily}")]
    PerTxnAboveDaily {
        /// Configured per-transaction cap.
        per_txn: i64,
        /// Configured daily cap.
        daily: i64,
    },
    /// A domain appears in both the allow and block sets.
    #[error("domain `{0}` is present in both allowed and blocked sets")]
    DomainInBothSets(String),
}

/// Spending policy governing a single agent.
///
/// Amounts are in minor currency units. The domain sets hold registered
/// domains compared case-insensitively by suffix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentPolicy {
    agent_id: AgentId,
    daily_cap: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    per_txn_cap: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approval_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    allowed_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blocked_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl AgentPolicy {
    /// Starts building a policy for the given agent.
    #[must_use]
    pub fn builder(agent_id: AgentId, daily_cap: i64) -> AgentPolicyBuilder {
        AgentPolicyBuilder {
            agent_id,
            daily_cap,
            per_txn_cap: None,
            approval_threshold: None,
            allowed_domains: BTreeSet::new(),
            blocked_domains: BTreeSet::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Returns the governed agent identifier.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Returns the daily spending cap in minor units.
    #[must_use]
    pub const fn daily_cap(&self) -> i64 {
        self.daily_cap
    }

    /// Returns the per-transaction cap, if configured.
    #[must_use]
    pub const fn per_txn_cap(&self) -> Option<i64> {
        self.per_txn_cap
    }

    /// Returns the inclusive human-approval threshold, if configured.
    #[must_use]
    pub const fn approval_threshold(&self) -> Option<i64> {
        self.approval_threshold
    }

    /// Returns the allowed-domain set (empty means "allow any").
    #[must_use]
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Returns the blocked-domain set.
    #[must_use]
    pub fn blocked_domains(&self) -> &[String] {
        &self.blocked_domains
    }

    /// Returns the creation timestamp, if known.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns the last-update timestamp, if known.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Builder validating [`AgentPolicy`] invariants on `build`.
#[derive(Debug)]
pub struct AgentPolicyBuilder {
    agent_id: AgentId,
    daily_cap: i64,
    per_txn_cap: Option<i64>,
    approval_threshold: Option<i64>,
    allowed_domains: BTreeSet<String>,
    blocked_domains: BTreeSet<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl AgentPolicyBuilder {
    /// Sets the per-transaction cap.
    #[must_use]
    pub const fn per_txn_cap(mut self, cap: i64) -> Self {
        self.per_txn_cap = Some(cap);
        self
    }

    /// Sets the inclusive human-approval threshold.
    #[must_use]
    pub const fn approval_threshold(mut self, threshold: i64) -> Self {
        self.approval_threshold = Some(threshold);
        self
    }

    /// Adds a domain to the allowlist, ignoring empty entries.
    #[must_use]
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into().trim().to_ascii_lowercase();
        if !domain.is_empty() {
            self.allowed_domains.insert(domain);
        }
        self
    }

    /// Adds a domain to the blocklist, ignoring empty entries.
    #[must_use]
    pub fn block_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into().trim().to_ascii_lowercase();
        if !domain.is_empty() {
            self.blocked_domains.insert(domain);
        }
        self
    }

    /// Sets both lifecycle timestamps (used when hydrating from storage).
    #[must_use]
    pub fn timestamps(
        mut self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Finalises the builder and validates the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyValidationError`] when a cap is negative, the
    /// per-transaction cap exceeds the daily cap, or a domain appears in
    /// both sets.
    pub fn build(self) -> Result<AgentPolicy, PolicyValidationError> {
        if self.daily_cap < 0 {
            return Err(PolicyValidationError::NegativeCap {
                field: "daily_cap",
                value: self.daily_cap,
            });
        }
        for (field, value) in [
            ("per_txn_cap", self.per_txn_cap),
            ("approval_threshold", self.approval_threshold),
        ] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(PolicyValidationError::NegativeCap { field, value });
                }
            }
        }
        if let Some(per_txn) = self.per_txn_cap {
            if per_txn > self.daily_cap {
                return Err(PolicyValidationError::PerTxnAboveDaily {
                    per_txn,
                    daily: self.daily_cap,
                });
            }
        }
        if let Some(overlap) = self
            .allowed_domains
            .intersection(&self.blocked_domains)
            .next()
        {
            return Err(PolicyValidationError::DomainInBothSets(overlap.clone()));
        }

        Ok(AgentPolicy {
            agent_id: self.agent_id,
            daily_cap: self.daily_cap,
            per_txn_cap: self.per_txn_cap,
            approval_threshold: self.approval_threshold,
            allowed_domains: self.allowed_domains.into_iter().collect(),
            blocked_domains: self.blocked_domains.into_iter().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::new("agent-01").unwrap()
    }

    #[test]
    fn builds_full_policy() {
        let policy = AgentPolicy::builder(agent(), 500_000)
            .per_txn_cap(100_000)
            .approval_threshold(50_000)
            .allow_domain("Vendor.Example")
            .block_domain("evil.example")
            .build()
            .unwrap();

        assert_eq!(policy.daily_cap(), 500_000);
        assert_eq!(policy.per_txn_cap(), Some(100_000));
        assert_eq!(policy.approval_threshold(), Some(50_000));
        assert_eq!(policy.allowed_domains(), ["vendor.example"]);
        assert_eq!(policy.blocked_domains(), ["evil.example"]);
    }

    #[test]
    fn rejects_per_txn_above_daily() {
        let err = AgentPolicy::builder(agent(), 1_000)
            .per_txn_cap(2_000)
            .build()
            .expect_err("per-txn above daily");
        assert_eq!(
            err,
            PolicyValidationError::PerTxnAboveDaily {
                per_txn: 2_000,
                daily: 1_000
            }
        );
    }

    #[test]
    fn rejects_domain_in_both_sets() {
        let err = AgentPolicy::builder(agent(), 1_000)
            .allow_domain("vendor.example")
            .block_domain("vendor.example")
            .build()
            .expect_err("overlapping sets");
        assert!(matches!(err, PolicyValidationError::DomainInBothSets(_)));
    }

    #[test]
    fn rejects_negative_caps() {
        assert!(AgentPolicy::builder(agent(), -1).build().is_err());
        assert!(AgentPolicy::builder(agent(), 10)
            .approval_threshold(-5)
            .build()
            .is_err());
    }
}
