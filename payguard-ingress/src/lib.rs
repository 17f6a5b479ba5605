//! Ingress adapter for the governance firewall.
//!
//! Two ingress modes share the same post-adapter pipeline: signature-
//! verified webhook push and a background poll of the payment backend's
//! queued payouts. Both normalize into `PayoutIntent` and submit to the
//! engine; the idempotency gate keeps the modes from double-processing
//! the same payout.

#![warn(missing_docs, clippy::pedantic)]

mod gate;
mod parse;
mod poller;
mod signature;
mod webhook;

pub use gate::InflightGate;
pub use parse::{intent_from_queued, parse_webhook_event, IngressError, WebhookEvent};
pub use poller::{PayoutPoller, PollerConfig, PollerStats};
pub use signature::verify_signature;
pub use webhook::{webhook_router, WebhookState, SIGNATURE_HEADER};
