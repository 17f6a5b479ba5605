//! Application state constructed once at startup.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use payguard_audit::{
    AuditFilter, AuditRecord, AuditSink, FallbackAuditSink, FileAuditSink, SqliteAuditSink,
};
use payguard_config::GuardConfig;
use payguard_egress::{Notifier, PaymentActions, PaymentClient, PaymentClientConfig, PushNotifier, PushNotifierConfig};
use payguard_engine::{
    CompositeDecisionObserver, DecisionObserver, EngineResult, GovernanceEngine,
    TracingDecisionObserver, Verdict,
};
use payguard_ingress::InflightGate;
use payguard_policy::{AgentPolicy, PolicyStore, SqlitePolicyStore};
use payguard_primitives::{AgentId, PayoutIntent};
use payguard_resilience::{BreakerConfig, CircuitBreaker, CircuitState};
use payguard_risk::{
    HistoryAnomalyScorer, LegalEntityClient, LegalEntityConfig, ScorerConfig,
    ThreatIntelConfig, ThreatIntelEvaluator,
};
use payguard_store::{
    BudgetLedger, KvBudgetLedger, KvIdempotencyRegistry, KvRateLimiter, KvStore, RateLimiter,
};
use payguard_telemetry::{ComponentHealth, HealthReport, MetricsCollector};

/// Budget position returned by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    /// Queried agent.
    pub agent_id: AgentId,
    /// Configured daily cap.
    pub daily_cap: i64,
    /// Reserved so far today.
    pub spent: i64,
    /// Remaining capacity.
    pub remaining: i64,
}

/// Policy upsert payload accepted on the admin surface. Validated through
/// the policy builder before it reaches the store.
#[derive(Debug, Deserialize)]
pub struct PolicyPayload {
    /// Governed agent.
    pub agent_id: AgentId,
    /// Daily cap in minor units.
    pub daily_cap: i64,
    /// Optional per-transaction cap.
    #[serde(default)]
    pub per_txn_cap: Option<i64>,
    /// Optional inclusive approval threshold.
    #[serde(default)]
    pub approval_threshold: Option<i64>,
    /// Allowed registered domains.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Blocked registered domains.
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

impl PolicyPayload {
    /// Validates the payload into a policy.
    ///
    /// # Errors
    ///
    /// Propagates policy invariant violations.
    pub fn into_policy(self) -> Result<AgentPolicy, payguard_policy::PolicyError> {
        let mut builder = AgentPolicy::builder(self.agent_id, self.daily_cap);
        if let Some(cap) = self.per_txn_cap {
            builder = builder.per_txn_cap(cap);
        }
        if let Some(threshold) = self.approval_threshold {
            builder = builder.approval_threshold(threshold);
        }
        for domain in self.allowed_domains {
            builder = builder.allow_domain(domain);
        }
        for domain in self.blocked_domains {
            builder = builder.block_domain(domain);
        }
        builder.build().map_err(Into::into)
    }
}

/// Observer feeding the metrics collector from engine decisions.
pub struct MetricsObserver {
    metrics: Arc<MetricsCollector>,
}

impl MetricsObserver {
    /// Creates an observer over the shared collector.
    #[must_use]
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl DecisionObserver for MetricsObserver {
    fn on_decision(&self, intent: &PayoutIntent, verdict: &Verdict) {
        self.metrics.record_decision(
            verdict.decision(),
            verdict.reason_code(),
            intent.amount(),
            verdict.processing_ms(),
        );
    }

    fn on_compensation(&self, _intent: &PayoutIntent, _detail: &str) {
        self.metrics.record_compensation();
    }

    fn on_budget_check(&self, ok: bool) {
        self.metrics.record_budget_check(ok);
    }

    fn on_reputation_check(&self, safe: bool, infra_failure: bool) {
        self.metrics.record_reputation_check(safe, infra_failure);
    }

    fn on_notification(&self, sent: bool) {
        self.metrics.record_notification(sent);
    }
}

/// All process-wide services, wired once and passed into handlers.
pub struct AppState {
    /// Loaded configuration (secrets redacted from `Debug`).
    pub config: GuardConfig,
    /// The governance engine.
    pub engine: Arc<GovernanceEngine>,
    /// Shared in-flight admission gate.
    pub gate: InflightGate,
    /// Metrics collector behind the `/metrics` route.
    pub metrics: Arc<MetricsCollector>,
    policies: Arc<SqlitePolicyStore>,
    ledger: Arc<KvBudgetLedger>,
    audit: Arc<FallbackAuditSink<SqliteAuditSink>>,
    breakers: Vec<Arc<CircuitBreaker>>,
    payments: Arc<dyn PaymentActions>,
    started: Instant,
}

impl AppState {
    /// Wires every component from configuration.
    ///
    /// # Errors
    ///
    /// Fails when the durable store cannot be opened or a client is
    /// misconfigured.
    pub async fn from_config(config: GuardConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&config.database_url)
            .await
            .context("opening durable store")?;

        let policies = Arc::new(SqlitePolicyStore::new(pool.clone()));
        policies.migrate().await.context("migrating policy store")?;

        let primary = SqliteAuditSink::new(pool.clone());
        primary.migrate().await.context("migrating audit store")?;
        let fallback = FileAuditSink::open(&config.audit_fallback_dir)
            .await
            .context("preparing audit fallback directory")?;
        let audit = Arc::new(FallbackAuditSink::new(primary, fallback).with_fallback_hook({
            let metrics = Arc::clone(&metrics);
            move || metrics.record_audit_fallback()
        }));

        let kv = Arc::new(KvStore::new());
        let ledger = Arc::new(KvBudgetLedger::new(Arc::clone(&kv)));
        let idempotency = Arc::new(KvIdempotencyRegistry::new(Arc::clone(&kv)));

        let breaker_config = BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            reset_timeout: config.breaker_reset_timeout,
        };
        let intel_breaker = Arc::new(CircuitBreaker::new("threat-intel", breaker_config));
        let identity_breaker = Arc::new(CircuitBreaker::new("identity", breaker_config));
        let payment_breaker = Arc::new(CircuitBreaker::new("payment", breaker_config));
        let notify_breaker = Arc::new(CircuitBreaker::new("notify", breaker_config));

        let reputation = Arc::new(
            ThreatIntelEvaluator::new(
                ThreatIntelConfig::new(config.threat_intel_key.expose())
                    .with_api_url(config.threat_intel_api_url.clone()),
                Arc::clone(&kv),
                Arc::clone(&intel_breaker),
            )
            .context("building threat-intel client")?,
        );
        let identity = Arc::new(LegalEntityClient::new(
            LegalEntityConfig::new().with_api_url(config.identity_api_url.clone()),
            Arc::clone(&kv),
            Arc::clone(&identity_breaker),
        ));
        let anomaly = Arc::new(HistoryAnomalyScorer::new(ScorerConfig::default()));

        let mut payment_config = PaymentClientConfig::new(
            config.payment_key_id.clone(),
            config.payment_key_secret.expose(),
        )
        .with_base_url(&config.payment_api_base)
        .context("building payment client")?;
        if let Some(account) = &config.payment_account {
            payment_config = payment_config.with_account_number(account.clone());
        }
        let payments: Arc<dyn PaymentActions> = Arc::new(
            PaymentClient::new(payment_config, Arc::clone(&payment_breaker))
                .context("building payment client")?,
        );

        let observer = Arc::new(CompositeDecisionObserver::new([
            Arc::new(TracingDecisionObserver) as Arc<dyn DecisionObserver>,
            Arc::new(MetricsObserver::new(Arc::clone(&metrics))) as Arc<dyn DecisionObserver>,
        ]));

        let mut builder = GovernanceEngine::builder(
            idempotency,
            Arc::clone(&policies) as Arc<dyn PolicyStore>,
            Arc::clone(&ledger) as Arc<dyn BudgetLedger>,
            reputation,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            Arc::clone(&payments),
        )
        .with_identity(identity)
        .with_anomaly(anomaly)
        .with_observer(observer);

        if config.rate_limit_max > 0 {
            let limiter = Arc::new(KvRateLimiter::new(
                Arc::clone(&kv),
                config.rate_limit_window,
                config.rate_limit_max,
            ));
            builder = builder.with_rate_limiter(limiter as Arc<dyn RateLimiter>);
        }

        if !config.notify_topic.is_empty() {
            let mut notify_config = PushNotifierConfig::new(config.notify_topic.clone())
                .with_server_url(config.notify_server.clone());
            if !config.notify_token.is_empty() {
                notify_config = notify_config.with_auth_token(config.notify_token.expose());
            }
            let notifier = PushNotifier::new(notify_config, Arc::clone(&notify_breaker))
                .context("building notifier")?;
            builder = builder.with_notifier(Arc::new(notifier) as Arc<dyn Notifier>);
        }

        let engine = Arc::new(builder.build());
        let gate = InflightGate::new(
            NonZeroUsize::new(config.inflight_limit.max(1)).expect("non-zero"),
        );

        info!("application state wired");
        Ok(Self {
            config,
            engine,
            gate,
            metrics,
            policies,
            ledger,
            audit,
            breakers: vec![intel_breaker, identity_breaker, payment_breaker, notify_breaker],
            payments,
            started: Instant::now(),
        })
    }

    /// Returns the payment client used by the pull-mode poller.
    #[must_use]
    pub fn payments(&self) -> Arc<dyn PaymentActions> {
        Arc::clone(&self.payments)
    }

    /// Submits an intent straight into the engine (admin surface).
    ///
    /// # Errors
    ///
    /// Propagates audit-trail loss from the engine.
    pub async fn submit_intent(&self, intent: &PayoutIntent) -> EngineResult<Verdict> {
        self.engine.submit(intent).await
    }

    /// Returns the budget position for an agent, or `None` without policy.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_budget(&self, agent_id: &AgentId) -> anyhow::Result<Option<BudgetStatus>> {
        let Some(policy) = self.policies.get(agent_id).await? else {
            return Ok(None);
        };
        let spent = self.ledger.current(agent_id).await?;
        Ok(Some(BudgetStatus {
            agent_id: agent_id.clone(),
            daily_cap: policy.daily_cap(),
            spent,
            remaining: (policy.daily_cap() - spent).max(0),
        }))
    }

    /// Queries the audit trail.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_audit(&self, filter: &AuditFilter) -> anyhow::Result<Vec<AuditRecord>> {
        Ok(self.audit.primary().query(filter).await?)
    }

    /// Validates and persists a policy.
    ///
    /// # Errors
    ///
    /// Propagates validation and store failures.
    pub async fn upsert_policy(&self, payload: PolicyPayload) -> anyhow::Result<AgentPolicy> {
        let policy = payload.into_policy()?;
        self.policies.upsert(&policy).await?;
        Ok(policy)
    }

    /// Builds the aggregate health report.
    pub async fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        let durable = match self.policies.get(&AgentId::new("health-probe").expect("valid id")).await
        {
            Ok(_) => ComponentHealth::Ok,
            Err(_) => ComponentHealth::Down,
        };
        components.insert("durable_store".to_owned(), durable);
        components.insert("kv_substrate".to_owned(), ComponentHealth::Ok);

        let mut breakers = Vec::with_capacity(self.breakers.len());
        for breaker in &self.breakers {
            let snapshot = breaker.snapshot();
            let health = match snapshot.state {
                CircuitState::Closed => ComponentHealth::Ok,
                CircuitState::HalfOpen => ComponentHealth::Degraded,
                CircuitState::Open => ComponentHealth::Down,
            };
            components.insert(snapshot.name.clone(), health);
            breakers.push(snapshot);
        }

        HealthReport {
            components,
            breakers,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    /// Renders the metrics exposition text.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }
}
