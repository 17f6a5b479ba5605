//! Per-agent spending policies for the governance firewall.

#![warn(missing_docs, clippy::pedantic)]

mod domain;
mod policy;
mod store;

pub use domain::{matches_domain_set, registered_domain};
pub use policy::{AgentPolicy, AgentPolicyBuilder, PolicyValidationError};
pub use store::{PolicyError, PolicyResult, PolicyStore, SqlitePolicyStore};
