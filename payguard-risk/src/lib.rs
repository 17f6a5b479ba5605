//! Vendor risk screening for the governance firewall.
//!
//! Three checks with three failure postures:
//! - reputation (threat intel) is financial and fails **closed**;
//! - identity (legal-entity registry) is advisory and fails **open**;
//! - anomaly scoring is advisory, process-local, and never gates a decision.

#![warn(missing_docs, clippy::pedantic)]

mod anomaly;
mod error;
mod identity;
mod reputation;
mod verdict;

pub use anomaly::{
    AgentRiskProfile, AnomalyScore, AnomalyScorer, HistoryAnomalyScorer, ScorerConfig,
};
pub use error::{RiskError, RiskResult};
pub use identity::{
    IdentityReport, IdentityVerifier, LegalEntityClient, LegalEntityConfig,
};
pub use reputation::{ReputationEvaluator, ThreatIntelConfig, ThreatIntelEvaluator};
pub use verdict::{
    is_infrastructure_tag, ReputationVerdict, TAG_INFRA_API_ERROR, TAG_INFRA_CIRCUIT_OPEN,
    TAG_INFRA_TIMEOUT,
};
