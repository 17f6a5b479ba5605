//! End-to-end governance pipeline scenarios over durable components.
//!
//! Exercises the engine against the SQLite-backed policy and audit stores
//! and the shared key/value substrate, with only the external network
//! collaborators stubbed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use payguard_audit::{
    AuditFilter, AuditSink, FallbackAuditSink, FileAuditSink, SqliteAuditSink,
};
use payguard_egress::{EgressResult, HeldSummary, Notifier, PaymentActions, QueuedPayout};
use payguard_engine::GovernanceEngine;
use payguard_policy::{AgentPolicy, PolicyStore, SqlitePolicyStore};
use payguard_primitives::{AgentId, Decision, PayoutId, PayoutIntent, ReasonCode};
use payguard_risk::{ReputationEvaluator, ReputationVerdict};
use payguard_store::{BudgetLedger, KvBudgetLedger, KvIdempotencyRegistry, KvStore};

/// Reputation stub: URLs under `evil.example` are flagged as MALWARE,
/// everything else is clean.
struct DomainReputation;

#[async_trait]
impl ReputationEvaluator for DomainReputation {
    async fn evaluate(&self, url: &str) -> ReputationVerdict {
        if url.contains("evil.example") {
            ReputationVerdict::flagged(url, vec!["MALWARE".to_owned()], 300)
        } else {
            ReputationVerdict::safe(url, 300)
        }
    }
}

#[derive(Default)]
struct RecordingPayments {
    approved: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentActions for RecordingPayments {
    async fn list_queued(&self) -> EgressResult<Vec<QueuedPayout>> {
        Ok(Vec::new())
    }

    async fn approve(&self, payout_id: &PayoutId) -> EgressResult<()> {
        self.approved.lock().unwrap().push(payout_id.to_string());
        Ok(())
    }

    async fn cancel(&self, payout_id: &PayoutId, _reason: &str) -> EgressResult<()> {
        self.cancelled.lock().unwrap().push(payout_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notified: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, summary: &HeldSummary) -> EgressResult<()> {
        self.notified
            .lock()
            .unwrap()
            .push(summary.payout_id.to_string());
        Ok(())
    }
}

struct Pipeline {
    engine: GovernanceEngine,
    policies: Arc<SqlitePolicyStore>,
    ledger: Arc<KvBudgetLedger>,
    audit: Arc<FallbackAuditSink<SqliteAuditSink>>,
    payments: Arc<RecordingPayments>,
    notifier: Arc<RecordingNotifier>,
    _fallback_dir: tempfile::TempDir,
}

async fn pipeline() -> Pipeline {
    // A single connection keeps every query on the same in-memory db.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let policies = Arc::new(SqlitePolicyStore::new(pool.clone()));
    policies.migrate().await.unwrap();

    let primary = SqliteAuditSink::new(pool);
    primary.migrate().await.unwrap();
    let fallback_dir = tempfile::tempdir().unwrap();
    let fallback = FileAuditSink::open(fallback_dir.path()).await.unwrap();
    let audit = Arc::new(FallbackAuditSink::new(primary, fallback));

    let kv = Arc::new(KvStore::new());
    let ledger = Arc::new(KvBudgetLedger::new(Arc::clone(&kv)));
    let payments = Arc::new(RecordingPayments::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = GovernanceEngine::builder(
        Arc::new(KvIdempotencyRegistry::new(Arc::clone(&kv))),
        Arc::clone(&policies) as Arc<dyn PolicyStore>,
        Arc::clone(&ledger) as Arc<dyn BudgetLedger>,
        Arc::new(DomainReputation),
        Arc::clone(&audit) as Arc<dyn AuditSink>,
        Arc::clone(&payments) as Arc<dyn PaymentActions>,
    )
    .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>)
    .build();

    Pipeline {
        engine,
        policies,
        ledger,
        audit,
        payments,
        notifier,
        _fallback_dir: fallback_dir,
    }
}

/// The standard scenario policy: daily 500 000, per-txn 100 000, human
/// approval at 50 000.
async fn install_policy(pipeline: &Pipeline, agent: &AgentId) {
    let policy = AgentPolicy::builder(agent.clone(), 500_000)
        .per_txn_cap(100_000)
        .approval_threshold(50_000)
        .build()
        .unwrap();
    pipeline.policies.upsert(&policy).await.unwrap();
}

fn intent(payout: &str, agent: &AgentId, amount: i64, vendor_url: Option<&str>) -> PayoutIntent {
    let mut builder =
        PayoutIntent::builder(PayoutId::new(payout).unwrap(), agent.clone(), amount)
            .currency("INR");
    if let Some(url) = vendor_url {
        builder = builder.vendor_url(url);
    }
    builder.build().unwrap()
}

async fn audit_reason(pipeline: &Pipeline, payout: &str) -> (Decision, ReasonCode) {
    let records = pipeline
        .audit
        .primary()
        .query(&AuditFilter {
            payout_id: Some(PayoutId::new(payout).unwrap()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1, "exactly one record for {payout}");
    (records[0].decision(), records[0].reason_code())
}

#[tokio::test]
async fn scenario_within_policy_approves() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-1").unwrap();
    install_policy(&p, &agent).await;

    let verdict = p
        .engine
        .submit(&intent("pout_e2e_1", &agent, 25_000, Some("https://safe.example")))
        .await
        .unwrap();

    assert_eq!(verdict.decision(), Decision::Approved);
    assert_eq!(verdict.reason_code(), ReasonCode::PolicyOk);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 25_000);
    assert_eq!(p.payments.approved.lock().unwrap().as_slice(), ["pout_e2e_1"]);
    assert_eq!(
        audit_reason(&p, "pout_e2e_1").await,
        (Decision::Approved, ReasonCode::PolicyOk)
    );
}

#[tokio::test]
async fn scenario_exhausted_budget_rejects() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-2").unwrap();
    install_policy(&p, &agent).await;
    p.ledger.reserve(&agent, 450_000, 500_000).await.unwrap();

    let verdict = p
        .engine
        .submit(&intent("pout_e2e_2", &agent, 75_000, None))
        .await
        .unwrap();

    assert_eq!(verdict.reason_code(), ReasonCode::LimitExceeded);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 450_000);
    assert_eq!(p.payments.cancelled.lock().unwrap().as_slice(), ["pout_e2e_2"]);
}

#[tokio::test]
async fn scenario_per_txn_cap_rejects_without_reserve() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-3").unwrap();
    install_policy(&p, &agent).await;

    let verdict = p
        .engine
        .submit(&intent("pout_e2e_3", &agent, 120_000, None))
        .await
        .unwrap();

    assert_eq!(verdict.reason_code(), ReasonCode::TxnLimitExceeded);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_flagged_vendor_rejects_and_rolls_back() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-4").unwrap();
    install_policy(&p, &agent).await;

    let verdict = p
        .engine
        .submit(&intent("pout_e2e_4", &agent, 30_000, Some("https://evil.example")))
        .await
        .unwrap();

    assert_eq!(verdict.reason_code(), ReasonCode::RiskHigh);
    assert_eq!(verdict.threat_tags(), ["MALWARE"]);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 0);

    let records = p
        .audit
        .primary()
        .query(&AuditFilter {
            payout_id: Some(PayoutId::new("pout_e2e_4").unwrap()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records[0].threat_tags(), ["MALWARE"]);
}

#[tokio::test]
async fn scenario_threshold_holds_and_notifies() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-5").unwrap();
    install_policy(&p, &agent).await;

    let verdict = p
        .engine
        .submit(&intent("pout_e2e_5", &agent, 60_000, Some("https://safe.example")))
        .await
        .unwrap();

    assert_eq!(verdict.decision(), Decision::Held);
    assert_eq!(verdict.reason_code(), ReasonCode::ApprovalRequired);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 60_000);
    assert_eq!(p.notifier.notified.lock().unwrap().as_slice(), ["pout_e2e_5"]);
    assert!(p.payments.approved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_replay_skips_idempotently() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-6").unwrap();
    install_policy(&p, &agent).await;
    let first = intent("pout_e2e_6", &agent, 25_000, Some("https://safe.example"));

    let initial = p.engine.submit(&first).await.unwrap();
    assert_eq!(initial.decision(), Decision::Approved);

    let replay = p.engine.submit(&first).await.unwrap();
    assert_eq!(replay.decision(), Decision::Skipped);
    assert_eq!(replay.reason_code(), ReasonCode::IdempotentSkip);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 25_000);
    assert_eq!(p.payments.approved.lock().unwrap().len(), 1);

    // The durable trail keeps the first terminal record for the payout.
    assert_eq!(
        audit_reason(&p, "pout_e2e_6").await,
        (Decision::Approved, ReasonCode::PolicyOk)
    );
}

#[tokio::test]
async fn concurrent_cycles_never_exceed_the_daily_cap() {
    let p = pipeline().await;
    let agent = AgentId::new("agent-e2e-cc").unwrap();
    let policy = AgentPolicy::builder(agent.clone(), 10_000).build().unwrap();
    p.policies.upsert(&policy).await.unwrap();

    let engine = Arc::new(p.engine);
    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        let agent = agent.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit(&intent(&format!("pout_e2e_cc_{i}"), &agent, 1_000, None))
                .await
                .unwrap()
                .reason_code()
        }));
    }

    let mut approved = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReasonCode::PolicyOk => approved += 1,
            ReasonCode::LimitExceeded => limited += 1,
            other => panic!("unexpected reason {other}"),
        }
    }

    assert_eq!(approved, 10);
    assert_eq!(limited, 10);
    assert_eq!(p.ledger.current(&agent).await.unwrap(), 10_000);

    let records = p
        .audit
        .primary()
        .query(&AuditFilter {
            agent_id: Some(agent.clone()),
            limit: Some(50),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 20);
}
