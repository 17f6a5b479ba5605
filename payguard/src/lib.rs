//! Financial governance firewall for autonomous agents: the facade crate.
//!
//! Depend on this crate via `cargo add payguard`. It bundles the internal
//! firewall crates behind feature flags so embedders can enable only the
//! components their deployment needs.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use payguard_primitives as primitives;

/// Audit trail (enabled by the `audit` feature).
#[cfg(feature = "audit")]
pub use payguard_audit as audit;

/// Environment configuration (enabled by the `config` feature).
#[cfg(feature = "config")]
pub use payguard_config as config;

/// Payment and notification clients (enabled by the `egress` feature).
#[cfg(feature = "egress")]
pub use payguard_egress as egress;

/// The governance decision engine (enabled by the `engine` feature).
#[cfg(feature = "engine")]
pub use payguard_engine as engine;

/// Webhook and polling ingress (enabled by the `ingress` feature).
#[cfg(feature = "ingress")]
pub use payguard_ingress as ingress;

/// Agent spending policies (enabled by the `policy` feature).
#[cfg(feature = "policy")]
pub use payguard_policy as policy;

/// Circuit breakers (enabled by the `resilience` feature).
#[cfg(feature = "resilience")]
pub use payguard_resilience as resilience;

/// Vendor risk screening (enabled by the `risk` feature).
#[cfg(feature = "risk")]
pub use payguard_risk as risk;

/// Budget and idempotency substrate (enabled by the `store` feature).
#[cfg(feature = "store")]
pub use payguard_store as store;

/// Metrics and health reporting (enabled by the `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use payguard_telemetry as telemetry;
