//! Fast key/value substrate for the governance firewall.
//!
//! Holds the state that must be mutated atomically per key: daily budget
//! counters, idempotency marks, the reputation cache, and rate-limit
//! windows. All mutations go through single-lock operations so a
//! check-and-update is one indivisible step with respect to concurrent
//! governance cycles.

#![warn(missing_docs, clippy::pedantic)]

mod budget;
mod idempotency;
mod kv;
mod rate_limit;

pub use budget::{BudgetLedger, KvBudgetLedger, ReserveOutcome};
pub use idempotency::{Claim, IdempotencyRegistry, KvIdempotencyRegistry};
pub use kv::KvStore;
pub use rate_limit::{KvRateLimiter, RateDecision, RateLimiter};

use thiserror::Error;

/// Errors surfaced by substrate-backed components.
///
/// The substrate being unreachable is a financial-safety event: callers
/// must treat it as fail-closed, never as an implicit allow.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The substrate could not serve the operation.
    #[error("key/value substrate unavailable: {reason}")]
    Unavailable {
        /// Human-readable explanation for logging and operators.
        reason: String,
    },
}

impl StoreError {
    /// Convenience constructor for unavailability errors.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Result alias for substrate operations.
pub type StoreResult<T> = Result<T, StoreError>;
