//! Sliding-window request rate limiting per agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use payguard_primitives::AgentId;

use crate::kv::KvStore;
use crate::StoreResult;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request was admitted into the window.
    pub allowed: bool,
    /// Live requests in the window after the check.
    pub count: u32,
}

/// Trait implemented by per-agent request rate limiters.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records a request attempt and checks it against the window limit.
    async fn check(&self, agent_id: &AgentId) -> StoreResult<RateDecision>;
}

/// Sliding-window limiter backed by the shared key/value substrate.
pub struct KvRateLimiter {
    kv: Arc<KvStore>,
    window: Duration,
    max_requests: u32,
}

impl KvRateLimiter {
    /// Creates a limiter admitting `max_requests` per `window` per agent.
    #[must_use]
    pub fn new(kv: Arc<KvStore>, window: Duration, max_requests: u32) -> Self {
        Self {
            kv,
            window,
            max_requests,
        }
    }
}

#[async_trait]
impl RateLimiter for KvRateLimiter {
    async fn check(&self, agent_id: &AgentId) -> StoreResult<RateDecision> {
        let key = format!("rate:{agent_id}");
        let (allowed, count) = self.kv.window_incr(&key, self.window, self.max_requests);
        if !allowed {
            warn!(
                agent_id = %agent_id,
                count,
                max = self.max_requests,
                "rate limit exceeded"
            );
        }
        Ok(RateDecision { allowed, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_until_window_is_full() {
        let limiter = KvRateLimiter::new(Arc::new(KvStore::new()), Duration::from_secs(60), 3);
        let agent = AgentId::new("agent-rate").unwrap();

        for expected in 1..=3 {
            let decision = limiter.check(&agent).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
        }
        let blocked = limiter.check(&agent).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.count, 3);
    }

    #[tokio::test]
    async fn agents_have_independent_windows() {
        let limiter = KvRateLimiter::new(Arc::new(KvStore::new()), Duration::from_secs(60), 1);
        let first = AgentId::new("agent-a").unwrap();
        let second = AgentId::new("agent-b").unwrap();

        assert!(limiter.check(&first).await.unwrap().allowed);
        assert!(limiter.check(&second).await.unwrap().allowed);
        assert!(!limiter.check(&first).await.unwrap().allowed);
    }
}
