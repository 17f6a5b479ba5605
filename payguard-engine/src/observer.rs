//! Hooks invoked whenever the engine produces a decision.

use std::sync::Arc;

use tracing::{info, warn};

use payguard_primitives::{Decision, PayoutIntent};

use crate::verdict::Verdict;

/// Observer invoked for every committed decision.
///
/// Implementations feed metrics, dashboards, or external audit streams.
/// Observers run after the audit commit and must not block for long.
pub trait DecisionObserver: Send + Sync {
    /// Records the verdict committed for the supplied intent.
    fn on_decision(&self, intent: &PayoutIntent, verdict: &Verdict);

    /// Records a compensating event after a post-commit action failure.
    fn on_compensation(&self, intent: &PayoutIntent, detail: &str) {
        let _ = (intent, detail);
    }

    /// Records a budget reservation outcome.
    fn on_budget_check(&self, ok: bool) {
        let _ = ok;
    }

    /// Records a reputation check outcome; `infra_failure` marks the
    /// fail-closed fallback path rather than a real threat match.
    fn on_reputation_check(&self, safe: bool, infra_failure: bool) {
        let _ = (safe, infra_failure);
    }

    /// Records a held-payout notification attempt.
    fn on_notification(&self, sent: bool) {
        let _ = sent;
    }
}

/// Observer that emits decisions to the tracing system.
#[derive(Default)]
pub struct TracingDecisionObserver;

impl DecisionObserver for TracingDecisionObserver {
    fn on_decision(&self, intent: &PayoutIntent, verdict: &Verdict) {
        match verdict.decision() {
            Decision::Approved => info!(
                payout_id = %intent.payout_id(),
                agent_id = %intent.agent_id(),
                amount = intent.amount(),
                reason = %verdict.reason_code(),
                elapsed_ms = verdict.processing_ms(),
                "decision: APPROVED"
            ),
            decision => warn!(
                payout_id = %intent.payout_id(),
                agent_id = %intent.agent_id(),
                amount = intent.amount(),
                decision = %decision,
                reason = %verdict.reason_code(),
                detail = verdict.reason_detail(),
                elapsed_ms = verdict.processing_ms(),
                "decision"
            ),
        }
    }

    fn on_compensation(&self, intent: &PayoutIntent, detail: &str) {
        warn!(
            payout_id = %intent.payout_id(),
            agent_id = %intent.agent_id(),
            detail,
            "compensating event recorded"
        );
    }
}

/// Composite observer forwarding to a collection of observers.
pub struct CompositeDecisionObserver {
    observers: Vec<Arc<dyn DecisionObserver>>,
}

impl CompositeDecisionObserver {
    /// Creates a composite from the supplied list.
    #[must_use]
    pub fn new<I>(observers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn DecisionObserver>>,
    {
        Self {
            observers: observers.into_iter().collect(),
        }
    }

    /// Adds an observer to the composite set.
    pub fn push(&mut self, observer: Arc<dyn DecisionObserver>) {
        self.observers.push(observer);
    }
}

impl DecisionObserver for CompositeDecisionObserver {
    fn on_decision(&self, intent: &PayoutIntent, verdict: &Verdict) {
        for observer in &self.observers {
            observer.on_decision(intent, verdict);
        }
    }

    fn on_compensation(&self, intent: &PayoutIntent, detail: &str) {
        for observer in &self.observers {
            observer.on_compensation(intent, detail);
        }
    }

    fn on_budget_check(&self, ok: bool) {
        for observer in &self.observers {
            observer.on_budget_check(ok);
        }
    }

    fn on_reputation_check(&self, safe: bool, infra_failure: bool) {
        for observer in &self.observers {
            observer.on_reputation_check(safe, infra_failure);
        }
    }

    fn on_notification(&self, sent: bool) {
        for observer in &self.observers {
            observer.on_notification(sent);
        }
    }
}
