//! Core shared types for the PayGuard governance firewall.

#![warn(missing_docs, clippy::pedantic)]

mod decision;
mod error;
mod ids;
mod intent;

/// Governance decision vocabulary shared by the engine, audit, and ingress.
pub use decision::{Decision, ReasonCode};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Validated identifiers for agents and payouts.
pub use ids::{AgentId, PayoutId};
/// The immutable payout intent evaluated by the governance pipeline.
pub use intent::{PayoutIntent, PayoutIntentBuilder};
