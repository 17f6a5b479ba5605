//! Shared error definitions for governance primitives.

use thiserror::Error;

/// Result alias used throughout the governance firewall.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing governance primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided agent identifier failed validation.
    #[error("invalid agent id `{id}`: {reason}")]
    InvalidAgentId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// The provided payout identifier failed validation.
    #[error("invalid payout id `{id}`: {reason}")]
    InvalidPayoutId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Payout intent construction failed validation.
    #[error("invalid payout intent: {reason}")]
    InvalidIntent {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for intent validation failures.
    #[must_use]
    pub fn invalid_intent(reason: impl Into<String>) -> Self {
        Self::InvalidIntent {
            reason: reason.into(),
        }
    }
}
