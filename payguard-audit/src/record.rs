//! The persisted decision trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payguard_primitives::{AgentId, Decision, PayoutId, ReasonCode};

/// A single committed governance decision.
///
/// Immutable once written; compensating events append new records rather
/// than rewriting existing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    payout_id: PayoutId,
    agent_id: AgentId,
    amount: i64,
    currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor_url: Option<String>,
    decision: Decision,
    reason_code: ReasonCode,
    reason_detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    threat_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processing_ms: Option<i64>,
    committed_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates a builder for a new audit record.
    #[must_use]
    pub fn builder(
        payout_id: PayoutId,
        agent_id: AgentId,
        amount: i64,
        decision: Decision,
        reason_code: ReasonCode,
    ) -> AuditRecordBuilder {
        AuditRecordBuilder {
            payout_id,
            agent_id,
            amount,
            currency: "USD".to_owned(),
            vendor_name: None,
            vendor_url: None,
            decision,
            reason_code,
            reason_detail: String::new(),
            threat_tags: Vec::new(),
            processing_ms: None,
            committed_at: None,
        }
    }

    /// Returns the payout identifier.
    #[must_use]
    pub fn payout_id(&self) -> &PayoutId {
        &self.payout_id
    }

    /// Returns the agent identifier.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Returns the vendor display name, if recorded.
    #[must_use]
    pub fn vendor_name(&self) -> Option<&str> {
        self.vendor_name.as_deref()
    }

    /// Returns the vendor URL, if recorded.
    #[must_use]
    pub fn vendor_url(&self) -> Option<&str> {
        self.vendor_url.as_deref()
    }

    /// Returns the committed decision.
    #[must_use]
    pub const fn decision(&self) -> Decision {
        self.decision
    }

    /// Returns the machine-readable reason code.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    /// Returns the human-readable reason detail.
    #[must_use]
    pub fn reason_detail(&self) -> &str {
        &self.reason_detail
    }

    /// Returns threat tags captured by the reputation check.
    #[must_use]
    pub fn threat_tags(&self) -> &[String] {
        &self.threat_tags
    }

    /// Returns the measured processing latency in milliseconds.
    #[must_use]
    pub const fn processing_ms(&self) -> Option<i64> {
        self.processing_ms
    }

    /// Returns the commit timestamp.
    #[must_use]
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }
}

/// Builder used to assemble [`AuditRecord`] instances.
#[derive(Debug)]
pub struct AuditRecordBuilder {
    payout_id: PayoutId,
    agent_id: AgentId,
    amount: i64,
    currency: String,
    vendor_name: Option<String>,
    vendor_url: Option<String>,
    decision: Decision,
    reason_code: ReasonCode,
    reason_detail: String,
    threat_tags: Vec<String>,
    processing_ms: Option<i64>,
    committed_at: Option<DateTime<Utc>>,
}

impl AuditRecordBuilder {
    /// Sets the currency code.
    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Sets the vendor display name.
    #[must_use]
    pub fn vendor_name(mut self, name: impl Into<String>) -> Self {
        self.vendor_name = Some(name.into());
        self
    }

    /// Sets the vendor URL.
    #[must_use]
    pub fn vendor_url(mut self, url: impl Into<String>) -> Self {
        self.vendor_url = Some(url.into());
        self
    }

    /// Sets the human-readable reason detail.
    #[must_use]
    pub fn reason_detail(mut self, detail: impl Into<String>) -> Self {
        self.reason_detail = detail.into();
        self
    }

    /// Attaches threat tags from the reputation check.
    #[must_use]
    pub fn threat_tags(mut self, tags: Vec<String>) -> Self {
        self.threat_tags = tags;
        self
    }

    /// Records the measured processing latency.
    #[must_use]
    pub const fn processing_ms(mut self, ms: i64) -> Self {
        self.processing_ms = Some(ms);
        self
    }

    /// Overrides the commit timestamp (defaults to now).
    #[must_use]
    pub fn committed_at(mut self, at: DateTime<Utc>) -> Self {
        self.committed_at = Some(at);
        self
    }

    /// Finalises the builder and produces the record.
    #[must_use]
    pub fn build(self) -> AuditRecord {
        AuditRecord {
            payout_id: self.payout_id,
            agent_id: self.agent_id,
            amount: self.amount,
            currency: self.currency,
            vendor_name: self.vendor_name,
            vendor_url: self.vendor_url,
            decision: self.decision,
            reason_code: self.reason_code,
            reason_detail: self.reason_detail,
            threat_tags: self.threat_tags,
            processing_ms: self.processing_ms,
            committed_at: self.committed_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_constructs_record() {
        let record = AuditRecord::builder(
            PayoutId::new("pout_1").unwrap(),
            AgentId::new("agent-01").unwrap(),
            25_000,
            Decision::Rejected,
            ReasonCode::RiskHigh,
        )
        .currency("INR")
        .vendor_url("https://evil.example")
        .reason_detail("threat intel flagged URL")
        .threat_tags(vec!["MALWARE".to_owned()])
        .processing_ms(12)
        .build();

        assert_eq!(record.decision(), Decision::Rejected);
        assert_eq!(record.reason_code(), ReasonCode::RiskHigh);
        assert_eq!(record.threat_tags(), ["MALWARE"]);
        assert_eq!(record.processing_ms(), Some(12));
    }

    #[test]
    fn serializes_with_wire_enums() {
        let record = AuditRecord::builder(
            PayoutId::new("pout_2").unwrap(),
            AgentId::new("agent-01").unwrap(),
            100,
            Decision::Approved,
            ReasonCode::PolicyOk,
        )
        .build();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["decision"], "APPROVED");
        assert_eq!(json["reason_code"], "POLICY_OK");
    }
}
