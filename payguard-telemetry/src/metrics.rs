//! Prometheus-format counters and latency histogram.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use payguard_primitives::{Decision, ReasonCode};

/// Histogram bucket boundaries in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 8] = [5, 10, 25, 50, 100, 250, 500, 1000];

/// Thread-safe metrics collector rendered in Prometheus text exposition
/// format. Counters are monotonic for the process lifetime.
pub struct MetricsCollector {
    started: Instant,
    decisions: Mutex<BTreeMap<(Decision, ReasonCode), u64>>,
    amounts: Mutex<BTreeMap<Decision, u64>>,
    latency_buckets: Mutex<[u64; 8]>,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    budget_ok: AtomicU64,
    budget_denied: AtomicU64,
    reputation_safe: AtomicU64,
    reputation_unsafe: AtomicU64,
    reputation_error: AtomicU64,
    webhooks_received: AtomicU64,
    webhooks_invalid_signature: AtomicU64,
    polls: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    audit_fallbacks: AtomicU64,
    compensations: AtomicU64,
}

impl MetricsCollector {
    /// Creates an empty collector stamped at process start.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            decisions: Mutex::new(BTreeMap::new()),
            amounts: Mutex::new(BTreeMap::new()),
            latency_buckets: Mutex::new([0; 8]),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            budget_ok: AtomicU64::new(0),
            budget_denied: AtomicU64::new(0),
            reputation_safe: AtomicU64::new(0),
            reputation_unsafe: AtomicU64::new(0),
            reputation_error: AtomicU64::new(0),
            webhooks_received: AtomicU64::new(0),
            webhooks_invalid_signature: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            audit_fallbacks: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
        }
    }

    /// Records a committed decision with its amount and latency.
    pub fn record_decision(
        &self,
        decision: Decision,
        reason: ReasonCode,
        amount: i64,
        processing_ms: i64,
    ) {
        *self
            .decisions
            .lock()
            .expect("metrics lock poisoned")
            .entry((decision, reason))
            .or_insert(0) += 1;
        *self
            .amounts
            .lock()
            .expect("metrics lock poisoned")
            .entry(decision)
            .or_insert(0) += amount.max(0).unsigned_abs();

        let ms = processing_ms.max(0).unsigned_abs();
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        let mut buckets = self.latency_buckets.lock().expect("metrics lock poisoned");
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if ms <= *bound {
                buckets[i] += 1;
            }
        }
    }

    /// Records a budget reservation outcome.
    pub fn record_budget_check(&self, ok: bool) {
        if ok {
            self.budget_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.budget_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a reputation check outcome; `infra_failure` marks the
    /// fail-closed fallback path.
    pub fn record_reputation_check(&self, safe: bool, infra_failure: bool) {
        if infra_failure {
            self.reputation_error.fetch_add(1, Ordering::Relaxed);
        } else if safe {
            self.reputation_safe.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reputation_unsafe.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an incoming webhook and whether its signature verified.
    pub fn record_webhook(&self, valid_signature: bool) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
        if !valid_signature {
            self.webhooks_invalid_signature
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one executed poll cycle.
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a held-payout notification attempt.
    pub fn record_notification(&self, sent: bool) {
        if sent {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an audit write that landed on the filesystem fallback.
    pub fn record_audit_fallback(&self) {
        self.audit_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a post-commit compensation event.
    pub fn record_compensation(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders all metrics in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);

        out.push_str("# TYPE payguard_decisions_total counter\n");
        for ((decision, reason), count) in &*self.decisions.lock().expect("metrics lock poisoned")
        {
            let _ = writeln!(
                out,
                "payguard_decisions_total{{decision=\"{decision}\",reason_code=\"{reason}\"}} {count}"
            );
        }

        out.push_str("# TYPE payguard_payout_amount_total counter\n");
        for (decision, total) in &*self.amounts.lock().expect("metrics lock poisoned") {
            let _ = writeln!(
                out,
                "payguard_payout_amount_total{{decision=\"{decision}\"}} {total}"
            );
        }

        out.push_str("# TYPE payguard_decision_latency_ms histogram\n");
        let buckets = *self.latency_buckets.lock().expect("metrics lock poisoned");
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            let _ = writeln!(
                out,
                "payguard_decision_latency_ms_bucket{{le=\"{bound}\"}} {}",
                buckets[i]
            );
        }
        let count = self.latency_count.load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "payguard_decision_latency_ms_bucket{{le=\"+Inf\"}} {count}"
        );
        let _ = writeln!(
            out,
            "payguard_decision_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "payguard_decision_latency_ms_count {count}");

        let simple = [
            ("payguard_budget_checks_total{result=\"ok\"}", &self.budget_ok),
            (
                "payguard_budget_checks_total{result=\"denied\"}",
                &self.budget_denied,
            ),
            (
                "payguard_reputation_checks_total{result=\"safe\"}",
                &self.reputation_safe,
            ),
            (
                "payguard_reputation_checks_total{result=\"unsafe\"}",
                &self.reputation_unsafe,
            ),
            (
                "payguard_reputation_checks_total{result=\"error\"}",
                &self.reputation_error,
            ),
            ("payguard_webhooks_total", &self.webhooks_received),
            (
                "payguard_webhooks_invalid_signature_total",
                &self.webhooks_invalid_signature,
            ),
            ("payguard_polls_total", &self.polls),
            (
                "payguard_notifications_total{result=\"sent\"}",
                &self.notifications_sent,
            ),
            (
                "payguard_notifications_total{result=\"failed\"}",
                &self.notifications_failed,
            ),
            ("payguard_audit_fallback_total", &self.audit_fallbacks),
            ("payguard_compensations_total", &self.compensations),
        ];
        for (name, value) in simple {
            let _ = writeln!(out, "{name} {}", value.load(Ordering::Relaxed));
        }

        out.push_str("# TYPE payguard_uptime_seconds gauge\n");
        let _ = writeln!(
            out,
            "payguard_uptime_seconds {}",
            self.started.elapsed().as_secs()
        );

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
