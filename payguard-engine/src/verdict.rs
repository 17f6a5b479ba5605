//! The engine's terminal output.

use serde::{Deserialize, Serialize};

use payguard_primitives::{Decision, ReasonCode};

/// Terminal outcome of one governance cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    decision: Decision,
    reason_code: ReasonCode,
    reason_detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    threat_tags: Vec<String>,
    processing_ms: i64,
}

impl Verdict {
    /// Creates a verdict with no threat tags.
    #[must_use]
    pub fn new(decision: Decision, reason_code: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            decision,
            reason_code,
            reason_detail: detail.into(),
            threat_tags: Vec::new(),
            processing_ms: 0,
        }
    }

    /// Attaches threat tags captured by the reputation check.
    #[must_use]
    pub fn with_threat_tags(mut self, tags: Vec<String>) -> Self {
        self.threat_tags = tags;
        self
    }

    /// Records the measured processing latency.
    #[must_use]
    pub const fn with_processing_ms(mut self, ms: i64) -> Self {
        self.processing_ms = ms;
        self
    }

    /// Appends advisory context to the reason detail.
    #[must_use]
    pub fn with_appended_detail(mut self, note: &str) -> Self {
        if !note.is_empty() {
            if !self.reason_detail.is_empty() {
                self.reason_detail.push_str("; ");
            }
            self.reason_detail.push_str(note);
        }
        self
    }

    /// Returns the decision.
    #[must_use]
    pub const fn decision(&self) -> Decision {
        self.decision
    }

    /// Returns the machine-readable reason code.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    /// Returns the human-readable detail.
    #[must_use]
    pub fn reason_detail(&self) -> &str {
        &self.reason_detail
    }

    /// Returns threat tags, when the reputation check produced any.
    #[must_use]
    pub fn threat_tags(&self) -> &[String] {
        &self.threat_tags
    }

    /// Returns the measured processing latency in milliseconds.
    #[must_use]
    pub const fn processing_ms(&self) -> i64 {
        self.processing_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_detail_joins_with_separator() {
        let verdict = Verdict::new(Decision::Approved, ReasonCode::PolicyOk, "all checks passed")
            .with_appended_detail("anomaly detected: unusual amount (z=3.2)");
        assert_eq!(
            verdict.reason_detail(),
            "all checks passed; anomaly detected: unusual amount (z=3.2)"
        );
    }

    #[test]
    fn serializes_wire_decision() {
        let verdict = Verdict::new(Decision::Skipped, ReasonCode::IdempotentSkip, "duplicate")
            .with_processing_ms(3);
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["decision"], "SKIPPED");
        assert_eq!(json["reason_code"], "IDEMPOTENT_SKIP");
        assert_eq!(json["processing_ms"], 3);
    }
}
