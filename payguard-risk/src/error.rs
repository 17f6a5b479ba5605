//! Error types for risk-screening clients.

use std::time::Duration;

use thiserror::Error;

/// Result alias used by risk clients.
pub type RiskResult<T> = Result<T, RiskError>;

/// Error type shared by the risk client implementations.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Client is misconfigured or missing credentials.
    #[error("risk client not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// Transport-level failures (network, TLS, protocol).
    #[error("risk transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The request timed out.
    #[error("risk request timed out after {timeout:?}")]
    Timeout {
        /// Configured request timeout.
        timeout: Duration,
    },

    /// The provider returned an error status or malformed body.
    #[error("risk response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl RiskError {
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
}
