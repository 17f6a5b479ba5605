//! The governance decision engine.
//!
//! Orchestrates a payout intent through deduplication, policy checks,
//! atomic budget reservation, vendor risk screening, and audit commitment,
//! then drives the post-commit payment and notification actions.

#![warn(missing_docs, clippy::pedantic)]

mod engine;
mod observer;
mod verdict;

pub use engine::{EngineError, EngineResult, GovernanceEngine, GovernanceEngineBuilder};
pub use observer::{CompositeDecisionObserver, DecisionObserver, TracingDecisionObserver};
pub use verdict::Verdict;
