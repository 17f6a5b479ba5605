//! Typed parsing of payout intents from both ingress modes.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use payguard_egress::QueuedPayout;
use payguard_primitives::{AgentId, PayoutId, PayoutIntent};

/// Event type the firewall acts on; everything else is acknowledged and
/// ignored.
const QUEUED_EVENT: &str = "payout.queued";

/// Errors raised while normalizing ingress payloads.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The body was not valid JSON for the expected envelope.
    #[error("malformed webhook body: {reason}")]
    MalformedBody {
        /// Parse failure detail.
        reason: String,
    },
    /// A field the pipeline requires was missing or invalid.
    #[error("missing or invalid required field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Validation failure detail.
        reason: String,
    },
}

/// Parsed webhook envelope: a wrapper event carrying the payout object.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payout: PayoutWrapper,
}

#[derive(Debug, Deserialize)]
struct PayoutWrapper {
    entity: PayoutEntity,
}

/// The payout object inside the envelope. Unknown optional fields are
/// collected into the annotation map rather than dropped.
#[derive(Debug, Deserialize)]
struct PayoutEntity {
    id: String,
    amount: i64,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    notes: Map<String, Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_currency() -> String {
    "USD".to_owned()
}

impl WebhookEvent {
    /// Returns the wrapper event type.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns `true` when this is a queued-payout event the pipeline
    /// acts on.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.event == QUEUED_EVENT
    }

    /// Normalizes the inner payout into a governance intent.
    ///
    /// # Errors
    ///
    /// Returns [`IngressError::InvalidField`] when a required field fails
    /// validation (the agent identifier in the annotations is required).
    pub fn into_intent(self) -> Result<PayoutIntent, IngressError> {
        let entity = self.payload.payout.entity;
        build_intent(
            &entity.id,
            entity.amount,
            &entity.currency,
            entity.notes,
            entity.extra,
        )
    }
}

/// Parses a raw webhook body into the typed envelope.
///
/// # Errors
///
/// Returns [`IngressError::MalformedBody`] when the body is not valid JSON
/// for the expected shape.
pub fn parse_webhook_event(body: &[u8]) -> Result<WebhookEvent, IngressError> {
    serde_json::from_slice(body).map_err(|err| IngressError::MalformedBody {
        reason: err.to_string(),
    })
}

/// Normalizes a poll-derived queued payout into a governance intent.
///
/// # Errors
///
/// Returns [`IngressError::InvalidField`] on the same conditions as the
/// push path; both modes share one normalizer.
pub fn intent_from_queued(payout: QueuedPayout) -> Result<PayoutIntent, IngressError> {
    build_intent(
        &payout.id,
        payout.amount,
        &payout.currency,
        payout.notes,
        Map::new(),
    )
}

fn build_intent(
    id: &str,
    amount: i64,
    currency: &str,
    mut notes: Map<String, Value>,
    extra: Map<String, Value>,
) -> Result<PayoutIntent, IngressError> {
    let payout_id = PayoutId::new(id).map_err(|err| IngressError::InvalidField {
        field: "payout_id",
        reason: err.to_string(),
    })?;

    let agent_id = match notes.remove("agent_id") {
        Some(Value::String(raw)) => {
            AgentId::new(raw).map_err(|err| IngressError::InvalidField {
                field: "agent_id",
                reason: err.to_string(),
            })?
        }
        Some(_) | None => {
            return Err(IngressError::InvalidField {
                field: "agent_id",
                reason: "annotations must carry the originating agent id".to_owned(),
            })
        }
    };

    let vendor_url = match notes.remove("vendor_url") {
        Some(Value::String(url)) if !url.trim().is_empty() => Some(url),
        _ => None,
    };
    let vendor_name = match notes.remove("vendor_name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name),
        _ => None,
    };

    let mut builder = PayoutIntent::builder(payout_id, agent_id, amount)
        .currency(currency)
        .merge_annotations(notes)
        .merge_annotations(extra);
    if let Some(url) = vendor_url {
        builder = builder.vendor_url(url);
    }
    if let Some(name) = vendor_name {
        builder = builder.vendor_name(name);
    }

    builder.build().map_err(|err| IngressError::InvalidField {
        field: "amount",
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUED_BODY: &str = r#"{
        "entity": "event",
        "event": "payout.queued",
        "payload": {
            "payout": {
                "entity": {
                    "id": "pout_w1",
                    "amount": 25000,
                    "currency": "INR",
                    "status": "queued",
                    "mode": "IMPS",
                    "notes": {
                        "agent_id": "agent-01",
                        "vendor_url": "https://vendor.example",
                        "purpose": "cloud invoice"
                    }
                }
            }
        }
    }"#;

    #[test]
    fn parses_queued_event_into_intent() {
        let event = parse_webhook_event(QUEUED_BODY.as_bytes()).unwrap();
        assert!(event.is_queued());

        let intent = event.into_intent().unwrap();
        assert_eq!(intent.payout_id().as_str(), "pout_w1");
        assert_eq!(intent.agent_id().as_str(), "agent-01");
        assert_eq!(intent.amount(), 25_000);
        assert_eq!(intent.currency(), "INR");
        assert_eq!(intent.vendor_url(), Some("https://vendor.example"));
        // Unconsumed annotation keys and unknown payout fields survive.
        assert_eq!(intent.annotations()["purpose"], "cloud invoice");
        assert_eq!(intent.annotations()["mode"], "IMPS");
        assert_eq!(intent.annotations()["status"], "queued");
    }

    #[test]
    fn non_queued_events_are_flagged() {
        let body = QUEUED_BODY.replace("payout.queued", "payout.processed");
        let event = parse_webhook_event(body.as_bytes()).unwrap();
        assert!(!event.is_queued());
    }

    #[test]
    fn missing_agent_id_is_rejected() {
        let body = QUEUED_BODY.replace("agent_id", "other_key");
        let event = parse_webhook_event(body.as_bytes()).unwrap();
        let err = event.into_intent().expect_err("agent id required");
        assert!(matches!(
            err,
            IngressError::InvalidField { field: "agent_id", .. }
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let err = parse_webhook_event(b"not json").expect_err("should fail");
        assert!(matches!(err, IngressError::MalformedBody { .. }));
    }

    #[test]
    fn queued_payout_normalizes_like_push() {
        let payout: QueuedPayout = serde_json::from_str(
            r#"{"id":"pout_p1","amount":5000,"currency":"INR","status":"queued",
                "notes":{"agent_id":"agent-02","vendor_name":"Acme"}}"#,
        )
        .unwrap();

        let intent = intent_from_queued(payout).unwrap();
        assert_eq!(intent.payout_id().as_str(), "pout_p1");
        assert_eq!(intent.agent_id().as_str(), "agent-02");
        assert_eq!(intent.vendor_name(), Some("Acme"));
        assert_eq!(intent.vendor_url(), None);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let body = QUEUED_BODY.replace("25000", "0");
        let event = parse_webhook_event(body.as_bytes()).unwrap();
        assert!(event.into_intent().is_err());
    }
}
