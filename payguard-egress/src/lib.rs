//! Outbound collaborator clients for the governance firewall.
//!
//! Covers the two egress surfaces the engine drives after a commit: the
//! payment backend (approve/cancel the backing payout, list queued intents
//! for pull-mode ingress) and the human-notification transport for held
//! payouts. All clients share the HTTPS stack and are wrapped in their own
//! circuit breakers.

#![warn(missing_docs, clippy::pedantic)]

mod http_client;
mod notify;
mod payment;
mod traits;

pub use http_client::{build_https_client, HttpsClient};
pub use notify::{PushNotifier, PushNotifierConfig};
pub use payment::{PaymentClient, PaymentClientConfig};
pub use traits::{
    EgressError, EgressResult, HeldSummary, Notifier, PaymentActions, QueuedPayout,
};
