//! Axum handler for payment-backend webhooks.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use payguard_engine::GovernanceEngine;
use payguard_telemetry::MetricsCollector;

use crate::gate::InflightGate;
use crate::parse::parse_webhook_event;
use crate::signature::verify_signature;

/// Header carrying the hex-encoded HMAC-SHA256 body signature.
pub const SIGNATURE_HEADER: &str = "x-payout-signature";

/// Webhook payloads are small; the limit bounds memory per request.
const MAX_BODY_SIZE: usize = 100 * 1024;

/// Shared state for the webhook route.
pub struct WebhookState {
    engine: Arc<GovernanceEngine>,
    secret: String,
    gate: InflightGate,
    metrics: Option<Arc<MetricsCollector>>,
}

impl WebhookState {
    /// Creates the webhook state.
    #[must_use]
    pub fn new(engine: Arc<GovernanceEngine>, secret: impl Into<String>, gate: InflightGate) -> Self {
        Self {
            engine,
            secret: secret.into(),
            gate,
            metrics: None,
        }
    }

    /// Attaches the metrics collector fed by ingress events.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Returns a router handling `POST /webhook`.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Webhook flow: verify signature, apply backpressure, parse, submit.
/// Signature failures are rejected at the boundary and never reach the
/// engine or the audit trail.
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let verified = !state.secret.is_empty() && verify_signature(&state.secret, &body, signature);
    if let Some(metrics) = &state.metrics {
        metrics.record_webhook(verified);
    }
    if !verified {
        warn!("webhook rejected: invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let Some(permit) = state.gate.try_enter() else {
        warn!("webhook deferred: in-flight limit reached");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "too many in-flight payouts, retry later" })),
        )
            .into_response();
    };

    let event = match parse_webhook_event(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "webhook rejected: malformed body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    if !event.is_queued() {
        debug!(event = event.event(), "ignoring non-queued webhook event");
        return (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "event": event.event() })),
        )
            .into_response();
    }

    let intent = match event.into_intent() {
        Ok(intent) => intent,
        Err(err) => {
            warn!(error = %err, "webhook rejected: invalid payout fields");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    // The cycle runs on its own task so a client disconnect cannot drop it
    // between a reservation and its commit; the permit travels with it.
    let engine = Arc::clone(&state.engine);
    let cycle = tokio::spawn(async move {
        let _permit = permit;
        engine.submit(&intent).await
    });

    match cycle.await {
        Ok(Ok(verdict)) => (StatusCode::OK, Json(json!(verdict))).into_response(),
        Ok(Err(err)) => {
            warn!(error = %err, "governance cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "decision could not be recorded" })),
            )
                .into_response()
        }
        Err(err) => {
            warn!(error = %err, "governance cycle task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "decision could not be recorded" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use tower::ServiceExt;

    use payguard_audit::{AuditRecord, AuditResult, AuditSink};
    use payguard_egress::{EgressResult, PaymentActions, QueuedPayout};
    use payguard_policy::{AgentPolicy, PolicyResult, PolicyStore};
    use payguard_primitives::{AgentId, PayoutId};
    use payguard_risk::{ReputationEvaluator, ReputationVerdict};
    use payguard_store::{BudgetLedger, KvBudgetLedger, KvIdempotencyRegistry, KvStore};

    const SECRET: &str = "whsec_router_test";

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
    struct NullAudit {
        count: Mutex<usize>,
    }

    #[async_trait]
    impl AuditSink for NullAudit {
        async fn commit(&self, _record: &AuditRecord) -> AuditResult<()> {
            *self.count.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullPayments;

    #[async_trait]
    impl PaymentActions for NullPayments {
        async fn list_queued(&self) -> EgressResult<Vec<QueuedPayout>> {
            Ok(Vec::new())
        }

        async fn approve(&self, _payout_id: &PayoutId) -> EgressResult<()> {
            Ok(())
        }

        async fn cancel(&self, _payout_id: &PayoutId, _reason: &str) -> EgressResult<()> {
            Ok(())
        }
    }

    fn router() -> Router {
        let kv = Arc::new(KvStore::new());
        let engine = payguard_engine::GovernanceEngine::builder(
            Arc::new(KvIdempotencyRegistry::new(Arc::clone(&kv))),
            Arc::new(OnePolicyStore),
            Arc::new(KvBudgetLedger::new(kv)) as Arc<dyn BudgetLedger>,
            Arc::new(SafeReputation),
            Arc::new(NullAudit::default()) as Arc<dyn AuditSink>,
            Arc::new(NullPayments) as Arc<dyn PaymentActions>,
        )
        .build();

        let state = Arc::new(WebhookState::new(
            Arc::new(engine),
            SECRET,
            InflightGate::new(NonZeroUsize::new(4).unwrap()),
        ));
        webhook_router(state)
    }

    fn sign(body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn queued_body(payout_id: &str) -> String {
        format!(
            r#"{{"event":"payout.queued","payload":{{"payout":{{"entity":{{
                "id":"{payout_id}","amount":25000,"currency":"INR",
                "notes":{{"agent_id":"agent-01"}}}}}}}}}}"#
        )
    }

    async fn post(router: Router, body: String, signature: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(SIGNATURE_HEADER, signature)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn verified_queued_webhook_is_decided() {
        let body = queued_body("pout_wh1");
        let signature = sign(&body);
        let (status, json) = post(router(), body, &signature).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["decision"], "APPROVED");
    }

    #[tokio::test]
    async fn invalid_signature_returns_401() {
        let body = queued_body("pout_wh2");
        let (status, _) = post(router(), body, "deadbeef").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_webhook_returns_skipped_marker() {
        let router = router();
        let body = queued_body("pout_wh3");
        let signature = sign(&body);

        let (status, first) = post(router.clone(), body.clone(), &signature).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["decision"], "APPROVED");

        let (status, second) = post(router, body, &signature).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["decision"], "SKIPPED");
        assert_eq!(second["reason_code"], "IDEMPOTENT_SKIP");
    }

    #[tokio::test]
    async fn non_queued_event_is_ignored() {
        let body = queued_body("pout_wh4").replace("payout.queued", "payout.processed");
        let signature = sign(&body);
        let (status, json) = post(router(), body, &signature).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
    }

    #[tokio::test]
    async fn malformed_verified_body_returns_400() {
        let body = "{\"event\":\"payout.queued\"}".to_owned();
        let signature = sign(&body);
        let (status, _) = post(router(), body, &signature).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
