//! The payout intent evaluated by the governance pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AgentId, Error, PayoutId, Result};

/// An agent-originated request to move money.
///
/// Intents are immutable once constructed; all mutation happens through the
/// builder. Amounts are integers in minor currency units (e.g. cents, paise).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutIntent {
    payout_id: PayoutId,
    agent_id: AgentId,
    amount: i64,
    currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor_url: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    annotations: Map<String, Value>,
    received_at: DateTime<Utc>,
}

impl PayoutIntent {
    /// Creates a builder for a new payout intent.
    #[must_use]
    pub fn builder(payout_id: PayoutId, agent_id: AgentId, amount: i64) -> PayoutIntentBuilder {
        PayoutIntentBuilder {
            payout_id,
            agent_id,
            amount,
            currency: None,
            vendor_name: None,
            vendor_url: None,
            annotations: Map::new(),
            received_at: None,
        }
    }

    /// Returns the unique payout identifier.
    #[must_use]
    pub fn payout_id(&self) -> &PayoutId {
        &self.payout_id
    }

    /// Returns the originating agent identifier.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Returns the amount in minor currency units.
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the three-letter currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Returns the vendor display name, if supplied.
    #[must_use]
    pub fn vendor_name(&self) -> Option<&str> {
        self.vendor_name.as_deref()
    }

    /// Returns the vendor URL, if supplied.
    #[must_use]
    pub fn vendor_url(&self) -> Option<&str> {
        self.vendor_url.as_deref()
    }

    /// Returns caller-supplied annotations carried through to audit.
    #[must_use]
    pub fn annotations(&self) -> &Map<String, Value> {
        &self.annotations
    }

    /// Returns the time the intent entered the firewall.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Builder used to assemble [`PayoutIntent`] instances safely.
#[derive(Debug)]
pub struct PayoutIntentBuilder {
    payout_id: PayoutId,
    agent_id: AgentId,
    amount: i64,
    currency: Option<String>,
    vendor_name: Option<String>,
    vendor_url: Option<String>,
    annotations: Map<String, Value>,
    received_at: Option<DateTime<Utc>>,
}

impl PayoutIntentBuilder {
    /// Sets the three-letter currency code.
    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Sets the vendor display name.
    #[must_use]
    pub fn vendor_name(mut self, name: impl Into<String>) -> Self {
        self.vendor_name = Some(name.into());
        self
    }

    /// Sets the vendor URL used for reputation screening.
    #[must_use]
    pub fn vendor_url(mut self, url: impl Into<String>) -> Self {
        self.vendor_url = Some(url.into());
        self
    }

    /// Adds an annotation entry, overwriting any existing key.
    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    /// Merges a full annotation map, overwriting existing keys on duplicates.
    #[must_use]
    pub fn merge_annotations(mut self, map: Map<String, Value>) -> Self {
        self.annotations.extend(map);
        self
    }

    /// Overrides the receipt timestamp (defaults to now).
    #[must_use]
    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    /// Finalises the builder and produces the intent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIntent`] when the amount is not positive or
    /// the currency code is not three ASCII letters.
    pub fn build(self) -> Result<PayoutIntent> {
        if self.amount <= 0 {
            return Err(Error::invalid_intent(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }

        let currency = self.currency.unwrap_or_else(|| "USD".to_owned());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::invalid_intent(format!(
                "currency must be a three-letter code, got `{currency}`"
            )));
        }

        Ok(PayoutIntent {
            payout_id: self.payout_id,
            agent_id: self.agent_id,
            amount: self.amount,
            currency: currency.to_ascii_uppercase(),
            vendor_name: self.vendor_name,
            vendor_url: self.vendor_url,
            annotations: self.annotations,
            received_at: self.received_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (PayoutId, AgentId) {
        (
            PayoutId::new("pout_0001").unwrap(),
            AgentId::new("agent-01").unwrap(),
        )
    }

    #[test]
    fn builder_constructs_intent() {
        let (payout_id, agent_id) = ids();
        let intent = PayoutIntent::builder(payout_id.clone(), agent_id.clone(), 25_000)
            .currency("inr")
            .vendor_url("https://vendor.example")
            .annotation("purpose", Value::from("cloud invoice"))
            .build()
            .unwrap();

        assert_eq!(intent.payout_id(), &payout_id);
        assert_eq!(intent.agent_id(), &agent_id);
        assert_eq!(intent.amount(), 25_000);
        assert_eq!(intent.currency(), "INR");
        assert_eq!(intent.vendor_url(), Some("https://vendor.example"));
        assert_eq!(
            intent.annotations().get("purpose").unwrap(),
            "cloud invoice"
        );
    }

    #[test]
    fn builder_rejects_non_positive_amount() {
        let (payout_id, agent_id) = ids();
        let err = PayoutIntent::builder(payout_id, agent_id, 0)
            .build()
            .expect_err("zero amount should fail");
        assert!(matches!(err, Error::InvalidIntent { .. }));
    }

    #[test]
    fn builder_rejects_bad_currency() {
        let (payout_id, agent_id) = ids();
        let err = PayoutIntent::builder(payout_id, agent_id, 100)
            .currency("RUPEES")
            .build()
            .expect_err("bad currency should fail");
        assert!(matches!(err, Error::InvalidIntent { .. }));
    }
}
