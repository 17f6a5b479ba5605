//! Error types for the audit subsystem.

use thiserror::Error;

/// Errors emitted by audit sinks.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The durable primary backend failed.
    #[error("audit primary failure: {reason}")]
    Primary {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// Underlying I/O failure while writing a fallback file.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization error while encoding a record.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },
    /// Both the primary and the fallback sink failed; the decision cycle
    /// must not complete.
    #[error("audit commit failed on primary ({primary}) and fallback ({fallback})")]
    AllSinksFailed {
        /// Failure reported by the primary sink.
        primary: String,
        /// Failure reported by the fallback sink.
        fallback: String,
    },
}

impl AuditError {
    /// Helper to construct primary-backend errors from string-like values.
    #[must_use]
    pub fn primary(reason: impl Into<String>) -> Self {
        Self::Primary {
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::primary(err.to_string())
    }
}

/// Result type alias for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
