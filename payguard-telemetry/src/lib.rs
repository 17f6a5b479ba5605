//! Observability for the governance firewall.

#![warn(missing_docs, clippy::pedantic)]

mod health;
mod metrics;

pub use health::{ComponentHealth, HealthReport};
pub use metrics::MetricsCollector;

use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber.
///
/// `RUST_LOG` overrides the supplied default level. Safe to call once at
/// process start; later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
