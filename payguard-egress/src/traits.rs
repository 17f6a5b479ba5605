//! Shared egress traits and data structures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use payguard_primitives::{AgentId, PayoutId};

/// Result alias used by egress clients.
pub type EgressResult<T> = Result<T, EgressError>;

/// Error type shared by egress client implementations.
#[derive(Debug, Error)]
pub enum EgressError {
    /// Client is misconfigured or missing credentials.
    #[error("egress client not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// Transport-level failures (network, TLS, protocol).
    #[error("egress transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The request timed out.
    #[error("egress request timed out after {timeout:?}")]
    Timeout {
        /// Configured request timeout.
        timeout: Duration,
    },

    /// The backend rejected the request; 4xx responses are never retried.
    #[error("egress client error {status}: {reason}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        reason: String,
    },

    /// The backend failed; 5xx responses are retried with backoff.
    #[error("egress server error {status}: {reason}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        reason: String,
    },

    /// The backend returned a malformed response.
    #[error("egress response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },

    /// The protecting circuit is open; no call was issued.
    #[error("egress circuit open: {name}")]
    CircuitOpen {
        /// Name of the tripped circuit.
        name: String,
    },
}

impl EgressError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for malformed responses.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }

    /// Returns `true` when a retry with backoff is worthwhile.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Server { .. }
        )
    }
}

/// A payout sitting in the payment backend's queued state.
///
/// This is the raw wire shape returned by the pull contract; the ingress
/// adapter normalizes it into a `PayoutIntent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPayout {
    /// Backend payout identifier.
    pub id: String,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Currency code.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Backend-reported status.
    #[serde(default)]
    pub status: String,
    /// Caller-supplied annotations (carries the agent id and vendor url).
    #[serde(default)]
    pub notes: Map<String, Value>,
}

fn default_currency() -> String {
    "USD".to_owned()
}

/// Trait implemented by payment-backend action clients.
///
/// The core treats 4xx responses as fatal and 5xx as retriable; the
/// backend's internal retry policy is not modelled.
#[async_trait]
pub trait PaymentActions: Send + Sync {
    /// Lists payouts currently in the queued state.
    async fn list_queued(&self) -> EgressResult<Vec<QueuedPayout>>;

    /// Approves a queued payout by id.
    async fn approve(&self, payout_id: &PayoutId) -> EgressResult<()>;

    /// Cancels a queued payout by id with a free-text reason.
    async fn cancel(&self, payout_id: &PayoutId, reason: &str) -> EgressResult<()>;
}

/// Summary of a held payout delivered to the human approver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldSummary {
    /// Payout identifier awaiting resolution.
    pub payout_id: PayoutId,
    /// Agent that originated the payout.
    pub agent_id: AgentId,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency code.
    pub currency: String,
    /// Why the payout was held.
    pub reason_detail: String,
}

/// Trait implemented by human-notification transports.
///
/// A notification failure never alters the governance decision; callers log
/// it and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a held-payout summary to the human channel.
    async fn notify(&self, summary: &HeldSummary) -> EgressResult<()>;
}
