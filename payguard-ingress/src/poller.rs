//! Pull-mode ingress: background polling of queued payouts.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use payguard_egress::PaymentActions;
use payguard_engine::GovernanceEngine;
use payguard_telemetry::MetricsCollector;

use crate::gate::InflightGate;
use crate::parse::intent_from_queued;

/// Poller tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Interval between polls while the backend is healthy.
    pub interval: Duration,
    /// First backoff step after a poll failure.
    pub backoff_base: Duration,
    /// Ceiling for the error backoff.
    pub backoff_max: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(120),
        }
    }
}

impl PollerConfig {
    /// Creates a configuration with the interval clamped to 5–300 s.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.clamp(Duration::from_secs(5), Duration::from_secs(300)),
            ..Self::default()
        }
    }
}

/// Point-in-time poller statistics for the health surface.
#[derive(Debug, Clone, Copy)]
pub struct PollerStats {
    /// Payouts submitted to the engine since start.
    pub total_processed: u64,
    /// Consecutive poll failures.
    pub error_count: u32,
}

/// Background loop pulling queued payouts from the payment backend.
///
/// Shares the idempotency gate with push mode through the engine, so a
/// payout seen by both modes is decided exactly once.
pub struct PayoutPoller {
    payments: Arc<dyn PaymentActions>,
    engine: Arc<GovernanceEngine>,
    gate: InflightGate,
    config: PollerConfig,
    metrics: Option<Arc<MetricsCollector>>,
    total_processed: AtomicU64,
    error_count: AtomicU32,
}

impl PayoutPoller {
    /// Creates a poller over the supplied payment client and engine.
    #[must_use]
    pub fn new(
        payments: Arc<dyn PaymentActions>,
        engine: Arc<GovernanceEngine>,
        gate: InflightGate,
        config: PollerConfig,
    ) -> Self {
        Self {
            payments,
            engine,
            gate,
            config,
            metrics: None,
            total_processed: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
        }
    }

    /// Attaches the metrics collector fed by poll cycles.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> PollerStats {
        PollerStats {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Executes a single poll cycle; returns how many payouts were
    /// submitted to the engine.
    pub async fn poll_once(&self) -> usize {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll();
        }
        let payouts = match self.payments.list_queued().await {
            Ok(payouts) => {
                self.error_count.store(0, Ordering::Relaxed);
                payouts
            }
            Err(err) => {
                let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
                error!(error = %err, consecutive = errors, "queued-payout poll failed");
                return 0;
            }
        };

        if payouts.is_empty() {
            debug!("no queued payouts found");
            return 0;
        }

        let mut submitted = 0;
        for payout in payouts {
            let payout_id = payout.id.clone();
            let intent = match intent_from_queued(payout) {
                Ok(intent) => intent,
                Err(err) => {
                    warn!(payout_id, error = %err, "skipping unparseable queued payout");
                    continue;
                }
            };

            // Waiting for a slot is the pull-mode backpressure: the loop
            // slows down instead of dropping payouts.
            let _permit = self.gate.enter().await;
            match self.engine.submit(&intent).await {
                Ok(verdict) => {
                    debug!(
                        payout_id = %intent.payout_id(),
                        decision = %verdict.decision(),
                        "polled payout decided"
                    );
                    submitted += 1;
                    self.total_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    error!(payout_id = %intent.payout_id(), error = %err, "cycle failed");
                }
            }
        }

        if submitted > 0 {
            info!(submitted, "poll cycle complete");
        }
        submitted
    }

    /// Runs the continuous poll loop until the shutdown signal flips.
    ///
    /// The signal is observed both between iterations and during backoff
    /// sleeps, so shutdown never waits out a long backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "payout poller starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.poll_once().await;

            let delay = jittered(self.backoff_interval());
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            total_processed = self.stats().total_processed,
            "payout poller stopped"
        );
    }

    /// Poll interval with exponential backoff on consecutive failures.
    fn backoff_interval(&self) -> Duration {
        let errors = self.error_count.load(Ordering::Relaxed);
        if errors == 0 {
            return self.config.interval;
        }
        let exponent = errors.saturating_sub(1).min(16);
        let backoff = self
            .config
            .backoff_base
            .saturating_mul(2_u32.saturating_pow(exponent));
        backoff.min(self.config.backoff_max)
    }
}

/// Applies ±20% jitter so pollers across replicas do not synchronize.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use payguard_audit::{AuditRecord, AuditResult, AuditSink};
    use payguard_egress::{EgressError, EgressResult, QueuedPayout};
    use payguard_policy::{AgentPolicy, PolicyResult, PolicyStore};
    use payguard_primitives::{AgentId, PayoutId};
    use payguard_risk::{ReputationEvaluator, ReputationVerdict};
    use payguard_store::{BudgetLedger, KvBudgetLedger, KvIdempotencyRegistry, KvStore};

    struct QueueBackend {
        queued: Mutex<Vec<QueuedPayout>>,
        fail_listing: AtomicBool,
        approved: Mutex<Vec<String>>,
    }

    impl QueueBackend {
        fn with_payouts(payouts: Vec<QueuedPayout>) -> Self {
            Self {
                queued: Mutex::new(payouts),
                fail_listing: AtomicBool::new(false),
                approved: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PaymentActions for QueueBackend {
        async fn list_queued(&self) -> EgressResult<Vec<QueuedPayout>> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(EgressError::Server {
                    status: 503,
                    reason: "listing down".into(),
                });
            }
            Ok(self.queued.lock().unwrap().clone())
        }

        async fn approve(&self, payout_id: &PayoutId) -> EgressResult<()> {
            self.approved.lock().unwrap().push(payout_id.to_string());
            Ok(())
        }

        async fn cancel(&self, _payout_id: &PayoutId, _reason: &str) -> EgressResult<()> {
            Ok(())
        }
    }

    struct OnePolicyStore;

    #[async_trait]
    impl PolicyStore for OnePolicyStore {
        async fn get(&self, agent_id: &AgentId) -> PolicyResult<Option<AgentPolicy>> {
            Ok(Some(
                AgentPolicy::builder(agent_id.clone(), 500_000)
                    .build()
                    .expect("valid policy"),
            ))
        }

        async fn upsert(&self, _policy: &AgentPolicy) -> PolicyResult<()> {
            Ok(())
        }
    }

    struct SafeReputation;

    #[async_trait]
    impl ReputationEvaluator for SafeReputation {
        async fn evaluate(&self, url: &str) -> ReputationVerdict {
            ReputationVerdict::safe(url, 300)
        }
    }

    #[derive(Default)]
    struct NullAudit;

    #[async_trait]
    impl AuditSink for NullAudit {
        async fn commit(&self, _record: &AuditRecord) -> AuditResult<()> {
            Ok(())
        }
    }

    fn queued(id: &str) -> QueuedPayout {
        serde_json::from_str(&format!(
            r#"{{"id":"{id}","amount":1000,"currency":"INR","status":"queued",
                "notes":{{"agent_id":"agent-01"}}}}"#
        ))
        .unwrap()
    }

    fn poller(backend: Arc<QueueBackend>) -> PayoutPoller {
        let kv = Arc::new(KvStore::new());
        let engine = payguard_engine::GovernanceEngine::builder(
            Arc::new(KvIdempotencyRegistry::new(Arc::clone(&kv))),
            Arc::new(OnePolicyStore),
            Arc::new(KvBudgetLedger::new(kv)) as Arc<dyn BudgetLedger>,
            Arc::new(SafeReputation),
            Arc::new(NullAudit) as Arc<dyn AuditSink>,
            Arc::clone(&backend) as Arc<dyn PaymentActions>,
        )
        .build();

        PayoutPoller::new(
            backend,
            Arc::new(engine),
            InflightGate::new(NonZeroUsize::new(4).unwrap()),
            PollerConfig::default(),
        )
    }

    #[tokio::test]
    async fn poll_once_submits_new_payouts() {
        let backend = Arc::new(QueueBackend::with_payouts(vec![
            queued("pout_pl1"),
            queued("pout_pl2"),
        ]));
        let poller = poller(Arc::clone(&backend));

        assert_eq!(poller.poll_once().await, 2);
        assert_eq!(
            backend.approved.lock().unwrap().as_slice(),
            ["pout_pl1", "pout_pl2"]
        );
    }

    #[tokio::test]
    async fn repeated_polls_deduplicate() {
        let backend = Arc::new(QueueBackend::with_payouts(vec![queued("pout_pl3")]));
        let poller = poller(Arc::clone(&backend));

        poller.poll_once().await;
        poller.poll_once().await;

        // Second poll re-submits but the engine skips the duplicate, so
        // only one approval reaches the backend.
        assert_eq!(backend.approved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_failures_back_off_exponentially() {
        let backend = Arc::new(QueueBackend::with_payouts(Vec::new()));
        backend.fail_listing.store(true, Ordering::SeqCst);
        let poller = poller(Arc::clone(&backend));

        assert_eq!(poller.backoff_interval(), poller.config.interval);
        poller.poll_once().await;
        assert_eq!(poller.backoff_interval(), Duration::from_secs(5));
        poller.poll_once().await;
        assert_eq!(poller.backoff_interval(), Duration::from_secs(10));
        poller.poll_once().await;
        assert_eq!(poller.backoff_interval(), Duration::from_secs(20));

        // Recovery resets the schedule.
        backend.fail_listing.store(false, Ordering::SeqCst);
        poller.poll_once().await;
        assert_eq!(poller.backoff_interval(), poller.config.interval);
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let backend = Arc::new(QueueBackend::with_payouts(Vec::new()));
        backend.fail_listing.store(true, Ordering::SeqCst);
        let poller = poller(Arc::clone(&backend));

        for _ in 0..10 {
            poller.poll_once().await;
        }
        assert_eq!(poller.backoff_interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn run_observes_shutdown_during_sleep() {
        let backend = Arc::new(QueueBackend::with_payouts(Vec::new()));
        let poller = Arc::new(poller(backend));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller should stop promptly")
            .unwrap();
    }

    #[test]
    fn interval_is_clamped() {
        assert_eq!(
            PollerConfig::new(Duration::from_secs(1)).interval,
            Duration::from_secs(5)
        );
        assert_eq!(
            PollerConfig::new(Duration::from_secs(900)).interval,
            Duration::from_secs(300)
        );
    }
}
