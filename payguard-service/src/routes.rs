//! HTTP surface: webhook ingress plus the admin/query routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use payguard_audit::AuditFilter;
use payguard_ingress::{webhook_router, WebhookState};
use payguard_primitives::{AgentId, PayoutId};

use crate::state::{AppState, PolicyPayload};

/// Assembles the full application router.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook_state = Arc::new(
        WebhookState::new(
            Arc::clone(&state.engine),
            state.config.webhook_secret.expose(),
            state.gate.clone(),
        )
        .with_metrics(Arc::clone(&state.metrics)),
    );

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/budget/:agent_id", get(budget))
        .route("/audit", get(audit))
        .route("/policy", put(upsert_policy))
        .with_state(Arc::clone(&state))
        .merge(webhook_router(webhook_state))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health().await;
    let status = if report.all_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!(report))).into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics_text(),
    )
        .into_response()
}

async fn budget(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Response {
    let Ok(agent_id) = AgentId::new(agent_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid agent id" })),
        )
            .into_response();
    };

    match state.get_budget(&agent_id).await {
        Ok(Some(status)) => (StatusCode::OK, Json(json!(status))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no policy configured for agent" })),
        )
            .into_response(),
        Err(err) => internal_error(&err),
    }
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    agent_id: Option<String>,
    payout_id: Option<String>,
    limit: Option<u32>,
}

async fn audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    let mut filter = AuditFilter {
        limit: query.limit,
        ..AuditFilter::default()
    };
    if let Some(raw) = query.agent_id {
        match AgentId::new(raw) {
            Ok(agent_id) => filter.agent_id = Some(agent_id),
            Err(err) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
    if let Some(raw) = query.payout_id {
        match PayoutId::new(raw) {
            Ok(payout_id) => filter.payout_id = Some(payout_id),
            Err(err) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }

    match state.get_audit(&filter).await {
        Ok(records) => (StatusCode::OK, Json(json!(records))).into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn upsert_policy(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PolicyPayload>,
) -> Response {
    match state.upsert_policy(payload).await {
        Ok(policy) => (StatusCode::OK, Json(json!(policy))).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

fn internal_error(err: &anyhow::Error) -> Response {
    warn!(error = %err, "admin route failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}
