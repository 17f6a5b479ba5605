//! Service wiring for the PayGuard governance firewall.
//!
//! Builds the [`AppState`] from configuration at process start and exposes
//! the HTTP surface: the webhook ingress plus the admin/query routes
//! consumed by surrounding tooling.

#![warn(missing_docs, clippy::pedantic)]

mod routes;
mod state;

pub use routes::build_router;
pub use state::{AppState, BudgetStatus, MetricsObserver, PolicyPayload};
