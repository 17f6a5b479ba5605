//! The decision pipeline and its wiring.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use payguard_audit::{AuditError, AuditRecord, AuditSink};
use payguard_egress::{HeldSummary, Notifier, PaymentActions};
use payguard_policy::{matches_domain_set, registered_domain, PolicyStore};
use payguard_primitives::{Decision, PayoutId, PayoutIntent, ReasonCode};
use payguard_risk::{AnomalyScorer, IdentityVerifier, ReputationEvaluator};
use payguard_store::{
    BudgetLedger, Claim, IdempotencyRegistry, RateLimiter, ReserveOutcome,
};

use crate::observer::DecisionObserver;
use crate::verdict::Verdict;

/// Errors the engine surfaces to the ingress.
///
/// Policy-driven rejections are ordinary verdicts, not errors; the only
/// failure that aborts a cycle is losing the audit trail entirely.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither the primary nor the fallback audit sink accepted the record.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Builder wiring the engine's capability interfaces at process start.
pub struct GovernanceEngineBuilder {
    idempotency: Arc<dyn IdempotencyRegistry>,
    policies: Arc<dyn PolicyStore>,
    ledger: Arc<dyn BudgetLedger>,
    reputation: Arc<dyn ReputationEvaluator>,
    audit: Arc<dyn AuditSink>,
    payments: Arc<dyn PaymentActions>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    identity: Option<Arc<dyn IdentityVerifier>>,
    anomaly: Option<Arc<dyn AnomalyScorer>>,
    notifier: Option<Arc<dyn Notifier>>,
    observer: Option<Arc<dyn DecisionObserver>>,
    deadline: Duration,
}

impl GovernanceEngineBuilder {
    /// Installs the per-agent request rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Installs the advisory identity verifier.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Installs the advisory anomaly scorer.
    #[must_use]
    pub fn with_anomaly(mut self, anomaly: Arc<dyn AnomalyScorer>) -> Self {
        self.anomaly = Some(anomaly);
        self
    }

    /// Installs the human-notification transport for held payouts.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Installs a decision observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DecisionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Overrides the end-to-end cycle deadline (default 10 s).
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Finalises the wiring.
    #[must_use]
    pub fn build(self) -> GovernanceEngine {
        GovernanceEngine {
            idempotency: self.idempotency,
            policies: self.policies,
            ledger: self.ledger,
            reputation: self.reputation,
            audit: self.audit,
            payments: self.payments,
            rate_limiter: self.rate_limiter,
            identity: self.identity,
            anomaly: self.anomaly,
            notifier: self.notifier,
            observer: self.observer,
            deadline: self.deadline,
        }
    }
}

/// The governance engine.
///
/// Depends only on narrow capability interfaces; concrete clients are
/// wired once at process start.
pub struct GovernanceEngine {
    idempotency: Arc<dyn IdempotencyRegistry>,
    policies: Arc<dyn PolicyStore>,
    ledger: Arc<dyn BudgetLedger>,
    reputation: Arc<dyn ReputationEvaluator>,
    audit: Arc<dyn AuditSink>,
    payments: Arc<dyn PaymentActions>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    identity: Option<Arc<dyn IdentityVerifier>>,
    anomaly: Option<Arc<dyn AnomalyScorer>>,
    notifier: Option<Arc<dyn Notifier>>,
    observer: Option<Arc<dyn DecisionObserver>>,
    deadline: Duration,
}

impl GovernanceEngine {
    /// Starts building an engine from its required collaborators.
    #[must_use]
    pub fn builder(
        idempotency: Arc<dyn IdempotencyRegistry>,
        policies: Arc<dyn PolicyStore>,
        ledger: Arc<dyn BudgetLedger>,
        reputation: Arc<dyn ReputationEvaluator>,
        audit: Arc<dyn AuditSink>,
        payments: Arc<dyn PaymentActions>,
    ) -> GovernanceEngineBuilder {
        GovernanceEngineBuilder {
            idempotency,
            policies,
            ledger,
            reputation,
            audit,
            payments,
            rate_limiter: None,
            identity: None,
            anomaly: None,
            notifier: None,
            observer: None,
            deadline: Duration::from_secs(10),
        }
    }

    /// Runs one full governance cycle for a payout intent.
    ///
    /// Exactly one audit record is committed before this returns; the
    /// post-commit payment or notification action is then dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Audit`] only when the decision could not be
    /// recorded anywhere; every other failure becomes a fail-closed
    /// rejection verdict.
    pub async fn submit(&self, intent: &PayoutIntent) -> EngineResult<Verdict> {
        let started = Instant::now();
        let reserved = Mutex::new(None);

        let pending = match self.idempotency.claim(intent.payout_id()).await {
            Ok(Claim::FirstSeen) => {
                match timeout(self.deadline, self.evaluate(intent, &reserved)).await {
                    Ok(verdict) => verdict,
                    Err(_) => {
                        warn!(
                            payout_id = %intent.payout_id(),
                            deadline = ?self.deadline,
                            "cycle deadline exceeded"
                        );
                        self.rollback_if_reserved(intent, &reserved).await;
                        Verdict::new(
                            Decision::Rejected,
                            ReasonCode::InternalError,
                            format!("cycle deadline of {:?} exceeded", self.deadline),
                        )
                    }
                }
            }
            Ok(Claim::AlreadySeen) => Verdict::new(
                Decision::Skipped,
                ReasonCode::IdempotentSkip,
                format!(
                    "payout `{}` was already processed within the retention window",
                    intent.payout_id()
                ),
            ),
            // The gate being unreachable is indistinguishable from a
            // possible duplicate, so the spend is refused.
            Err(err) => Verdict::new(
                Decision::Rejected,
                ReasonCode::InternalError,
                format!("idempotency gate unavailable: {err}"),
            ),
        };

        let verdict = pending.with_processing_ms(elapsed_ms(started));
        if let Err(err) = self.commit(intent, &verdict).await {
            // No terminal decision exists without an audit record, so a
            // reservation held for an APPROVED or HELD outcome is released.
            self.rollback_if_reserved(intent, &reserved).await;
            return Err(err);
        }

        if let Some(observer) = &self.observer {
            observer.on_decision(intent, &verdict);
        }

        self.dispatch_post_commit(intent, &verdict).await;
        Ok(verdict)
    }

    /// Steps 2 through 9 of the decision matrix. Every rejection after the
    /// reservation releases it before returning.
    async fn evaluate(&self, intent: &PayoutIntent, reserved: &Mutex<Option<i64>>) -> Verdict {
        let policy = match self.policies.get(intent.agent_id()).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::NoPolicy,
                    format!(
                        "no spending policy configured for agent `{}`",
                        intent.agent_id()
                    ),
                )
            }
            Err(err) => {
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::InternalError,
                    format!("policy store unavailable: {err}"),
                )
            }
        };

        // Checked before reservation so oversized requests never inflate
        // the counter, even transiently.
        if let Some(cap) = policy.per_txn_cap() {
            if intent.amount() > cap {
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::TxnLimitExceeded,
                    format!(
                        "amount {} exceeds per-transaction cap of {cap}",
                        intent.amount()
                    ),
                );
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            match limiter.check(intent.agent_id()).await {
                Ok(decision) if !decision.allowed => {
                    return Verdict::new(
                        Decision::Rejected,
                        ReasonCode::RateLimited,
                        format!(
                            "request rate limit reached ({} live requests in window)",
                            decision.count
                        ),
                    )
                }
                Ok(_) => {}
                Err(err) => {
                    return Verdict::new(
                        Decision::Rejected,
                        ReasonCode::InternalError,
                        format!("rate limiter unavailable: {err}"),
                    )
                }
            }
        }

        match self
            .ledger
            .reserve(intent.agent_id(), intent.amount(), policy.daily_cap())
            .await
        {
            Ok(ReserveOutcome::Reserved { .. }) => {
                self.notify_observer(|observer| observer.on_budget_check(true));
                *reserved.lock().expect("reservation lock poisoned") = Some(intent.amount());
            }
            Ok(ReserveOutcome::Denied { current }) => {
                self.notify_observer(|observer| observer.on_budget_check(false));
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::LimitExceeded,
                    format!(
                        "daily budget exceeded: spent {current} + {} > cap {}",
                        intent.amount(),
                        policy.daily_cap()
                    ),
                )
            }
            Err(err) => {
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::InternalError,
                    format!("budget ledger unavailable: {err}"),
                )
            }
        }

        if let Some(url) = intent.vendor_url() {
            if let Some(domain) = registered_domain(url) {
                if matches_domain_set(&domain, policy.blocked_domains()) {
                    self.rollback_if_reserved(intent, reserved).await;
                    return Verdict::new(
                        Decision::Rejected,
                        ReasonCode::DomainBlocked,
                        format!("vendor domain `{domain}` is on the blocklist"),
                    );
                }
                if !policy.allowed_domains().is_empty()
                    && !matches_domain_set(&domain, policy.allowed_domains())
                {
                    self.rollback_if_reserved(intent, reserved).await;
                    return Verdict::new(
                        Decision::Rejected,
                        ReasonCode::DomainBlocked,
                        format!("vendor domain `{domain}` is not in the allowlist"),
                    );
                }
            }

            let reputation = self.reputation.evaluate(url).await;
            self.notify_observer(|observer| {
                observer.on_reputation_check(reputation.is_safe(), reputation.is_from_fallback());
            });
            if !reputation.is_safe() {
                self.rollback_if_reserved(intent, reserved).await;
                let tags = reputation.threat_tags().to_vec();
                return Verdict::new(
                    Decision::Rejected,
                    ReasonCode::RiskHigh,
                    format!("threat intel flagged vendor URL: {}", tags.join(", ")),
                )
                .with_threat_tags(tags);
            }
        }

        let advisory = self.advisory_notes(intent).await;

        if let Some(threshold) = policy.approval_threshold() {
            if intent.amount() >= threshold {
                // Budget stays reserved until a human resolves the payout.
                return Verdict::new(
                    Decision::Held,
                    ReasonCode::ApprovalRequired,
                    format!(
                        "amount {} reached approval threshold of {threshold}",
                        intent.amount()
                    ),
                )
                .with_appended_detail(&advisory);
            }
        }

        Verdict::new(
            Decision::Approved,
            ReasonCode::PolicyOk,
            "all governance checks passed",
        )
        .with_appended_detail(&advisory)
    }

    /// Advisory enrichment: identity verification and anomaly scoring.
    /// Neither can change the decision reached by the matrix above.
    async fn advisory_notes(&self, intent: &PayoutIntent) -> String {
        let mut notes = Vec::new();

        if let (Some(identity), Some(name)) = (&self.identity, intent.vendor_name()) {
            let report = identity.verify(name).await;
            if report.verified {
                let legal = report.legal_name.unwrap_or_else(|| name.to_owned());
                notes.push(format!("vendor identity verified as `{legal}`"));
            }
        }

        if let Some(anomaly) = &self.anomaly {
            let score = anomaly
                .score(intent.agent_id(), intent.amount(), intent.received_at())
                .await;
            if score.anomalous {
                notes.push(score.detail);
            }
        }

        notes.join("; ")
    }

    fn notify_observer(&self, call: impl FnOnce(&dyn DecisionObserver)) {
        if let Some(observer) = &self.observer {
            call(observer.as_ref());
        }
    }

    async fn rollback_if_reserved(&self, intent: &PayoutIntent, reserved: &Mutex<Option<i64>>) {
        let amount = reserved.lock().expect("reservation lock poisoned").take();
        if let Some(amount) = amount {
            if let Err(err) = self.ledger.rollback(intent.agent_id(), amount).await {
                // The counter now over-reports until its daily expiry;
                // operators see this via the error log and metrics.
                error!(
                    payout_id = %intent.payout_id(),
                    agent_id = %intent.agent_id(),
                    amount,
                    error = %err,
                    "budget rollback failed"
                );
            }
        }
    }

    async fn commit(&self, intent: &PayoutIntent, verdict: &Verdict) -> EngineResult<()> {
        let record = build_record(intent, verdict, intent.payout_id().clone());
        self.audit.commit(&record).await?;
        Ok(())
    }

    async fn dispatch_post_commit(&self, intent: &PayoutIntent, verdict: &Verdict) {
        match verdict.decision() {
            Decision::Approved => {
                if let Err(err) = self.payments.approve(intent.payout_id()).await {
                    error!(
                        payout_id = %intent.payout_id(),
                        error = %err,
                        "payment approval dispatch failed after commit"
                    );
                    self.compensate_failed_approval(intent, &err.to_string()).await;
                }
            }
            Decision::Rejected => {
                if let Err(err) = self
                    .payments
                    .cancel(intent.payout_id(), verdict.reason_detail())
                    .await
                {
                    warn!(
                        payout_id = %intent.payout_id(),
                        error = %err,
                        "payment cancel dispatch failed"
                    );
                }
            }
            Decision::Held => {
                if let Some(notifier) = &self.notifier {
                    let summary = HeldSummary {
                        payout_id: intent.payout_id().clone(),
                        agent_id: intent.agent_id().clone(),
                        amount: intent.amount(),
                        currency: intent.currency().to_owned(),
                        reason_detail: verdict.reason_detail().to_owned(),
                    };
                    match notifier.notify(&summary).await {
                        Ok(()) => self.notify_observer(|observer| observer.on_notification(true)),
                        Err(err) => {
                            warn!(
                                payout_id = %intent.payout_id(),
                                error = %err,
                                "held-payout notification failed"
                            );
                            self.notify_observer(|observer| observer.on_notification(false));
                        }
                    }
                } else {
                    info!(
                        payout_id = %intent.payout_id(),
                        "payout held with no notifier configured"
                    );
                }
            }
            Decision::Skipped => {}
        }
    }

    /// The APPROVED record stands (audit is append-only); the reservation
    /// is released and a compensating entry makes the divergence explicit.
    async fn compensate_failed_approval(&self, intent: &PayoutIntent, failure: &str) {
        if let Err(err) = self
            .ledger
            .rollback(intent.agent_id(), intent.amount())
            .await
        {
            error!(
                payout_id = %intent.payout_id(),
                error = %err,
                "compensating budget rollback failed"
            );
        }

        let detail = format!(
            "payment approval dispatch failed after APPROVED commit: {failure}; \
             budget reservation rolled back"
        );
        let comp_id = PayoutId::new(format!("{}.comp", intent.payout_id()))
            .unwrap_or_else(|_| intent.payout_id().clone());
        let record = build_record(
            intent,
            &Verdict::new(Decision::Rejected, ReasonCode::InternalError, detail.clone()),
            comp_id,
        );
        if let Err(err) = self.audit.commit(&record).await {
            error!(
                payout_id = %intent.payout_id(),
                error = %err,
                "compensating audit entry failed"
            );
        }

        if let Some(observer) = &self.observer {
            observer.on_compensation(intent, &detail);
        }
    }
}

fn build_record(intent: &PayoutIntent, verdict: &Verdict, payout_id: PayoutId) -> AuditRecord {
    let mut builder = AuditRecord::builder(
        payout_id,
        intent.agent_id().clone(),
        intent.amount(),
        verdict.decision(),
        verdict.reason_code(),
    )
    .currency(intent.currency())
    .reason_detail(verdict.reason_detail())
    .threat_tags(verdict.threat_tags().to_vec())
    .processing_ms(verdict.processing_ms());

    if let Some(name) = intent.vendor_name() {
        builder = builder.vendor_name(name);
    }
    if let Some(url) = intent.vendor_url() {
        builder = builder.vendor_url(url);
    }
    builder.build()
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
