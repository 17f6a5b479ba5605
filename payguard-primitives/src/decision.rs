//! Governance decision vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal governance decision for a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// All checks passed; the payout may be executed.
    Approved,
    /// A policy or risk check failed; the payout must be cancelled.
    Rejected,
    /// Budget stays reserved while a human resolves the payout.
    Held,
    /// Duplicate submission; a decision was already committed.
    Skipped,
}

impl Decision {
    /// Returns the wire representation (`APPROVED`, `REJECTED`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Held => "HELD",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason accompanying every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// All governance checks passed.
    PolicyOk,
    /// No spending policy is configured for the agent.
    NoPolicy,
    /// The daily budget cap would be exceeded.
    LimitExceeded,
    /// The per-transaction cap was exceeded.
    TxnLimitExceeded,
    /// The vendor domain is blocked or missing from a configured allowlist.
    DomainBlocked,
    /// Threat intelligence flagged the vendor URL (or could not clear it).
    RiskHigh,
    /// The amount reached the human-approval threshold.
    ApprovalRequired,
    /// Duplicate payout identifier within the retention window.
    IdempotentSkip,
    /// The agent exceeded its request rate window.
    RateLimited,
    /// The ingress signature did not verify.
    InvalidSignature,
    /// An unexpected failure inside the pipeline.
    InternalError,
}

impl ReasonCode {
    /// Returns the wire representation (`POLICY_OK`, `NO_POLICY`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyOk => "POLICY_OK",
            Self::NoPolicy => "NO_POLICY",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::TxnLimitExceeded => "TXN_LIMIT_EXCEEDED",
            Self::DomainBlocked => "DOMAIN_BLOCKED",
            Self::RiskHigh => "RISK_HIGH",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::IdempotentSkip => "IDEMPOTENT_SKIP",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
