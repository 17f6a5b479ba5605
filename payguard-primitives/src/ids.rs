//! Validated identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const MAX_AGENT_ID_LEN: usize = 128;
const MAX_PAYOUT_ID_LEN: usize = 64;

/// Identifier of an autonomous agent subject to governance.
///
/// Agent ids are opaque caller-supplied strings (e.g. `agent-invoicing-01`).
/// They key policies, budget counters, and anomaly history.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new agent identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAgentId`] if the identifier is empty, too long,
    /// or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if let Err(reason) = validate_identifier(&id, MAX_AGENT_ID_LEN) {
            return Err(Error::InvalidAgentId { id, reason });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<AgentId> for String {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

/// Identifier of a single payout intent issued by the payment backend.
///
/// Unique across the idempotency retention window; deduplication keys on it.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutId(String);

impl PayoutId {
    /// Creates a new payout identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayoutId`] if the identifier is empty, too
    /// long, or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if let Err(reason) = validate_identifier(&id, MAX_PAYOUT_ID_LEN) {
            return Err(Error::InvalidPayoutId { id, reason });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PayoutId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PayoutId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<PayoutId> for String {
    fn from(value: PayoutId) -> Self {
        value.0
    }
}

fn validate_identifier(id: &str, max_len: usize) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("identifier cannot be empty".into());
    }
    if id.len() > max_len {
        return Err(format!("identifier length must be <= {max_len}"));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("identifier must not contain whitespace or control characters".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_agent_id() {
        let id = AgentId::new("agent-invoicing-01").unwrap();
        let parsed = id.to_string().parse::<AgentId>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_empty_and_whitespace_ids() {
        assert!(AgentId::new("").is_err());
        assert!(AgentId::new("agent one").is_err());
        assert!(PayoutId::new("pout\n1").is_err());
    }

    #[test]
    fn rejects_overlong_payout_id() {
        let long = "p".repeat(65);
        let err = PayoutId::new(long).expect_err("too long");
        assert!(matches!(err, Error::InvalidPayoutId { .. }));
    }
}
