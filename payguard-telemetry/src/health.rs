//! Health reporting types for the admin surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use payguard_resilience::BreakerSnapshot;

/// Health of a single dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    /// Dependency is reachable and serving.
    Ok,
    /// Dependency is serving with reduced capacity (e.g. breaker half-open
    /// or the audit trail running on its fallback).
    Degraded,
    /// Dependency is unreachable.
    Down,
}

/// Aggregate health snapshot returned by the `health` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Per-component status keyed by component name.
    pub components: BTreeMap<String, ComponentHealth>,
    /// Snapshots of every circuit breaker in the process.
    pub breakers: Vec<BreakerSnapshot>,
    /// Seconds since process start.
    pub uptime_seconds: u64,
}

impl HealthReport {
    /// Returns `true` when every component reports [`ComponentHealth::Ok`].
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.components
            .values()
            .all(|health| *health == ComponentHealth::Ok)
    }
}
