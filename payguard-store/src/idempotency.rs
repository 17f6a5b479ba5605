//! At-most-once ingress gate keyed by payout identifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use payguard_primitives::PayoutId;

use crate::kv::KvStore;
use crate::StoreResult;

/// Marks are retained for 48 hours, covering realistic webhook-retry
/// windows on the payment backend.
const MARK_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Outcome of an idempotency claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This payout identifier has not been seen before; the caller owns it.
    FirstSeen,
    /// A live mark already exists; the payout was already processed.
    AlreadySeen,
}

/// Trait implemented by idempotency registries.
///
/// `claim` must set the mark and its expiry in a single atomic step; a
/// separate set-then-expire would leak an unexpiring mark on a crash
/// between the two. Implementations must surface substrate failures as
/// errors, which the engine treats as fail-closed rejection.
#[async_trait]
pub trait IdempotencyRegistry: Send + Sync {
    /// Atomically claims a payout identifier.
    async fn claim(&self, payout_id: &PayoutId) -> StoreResult<Claim>;
}

/// Idempotency registry backed by the shared key/value substrate.
pub struct KvIdempotencyRegistry {
    kv: Arc<KvStore>,
}

impl KvIdempotencyRegistry {
    /// Creates a registry on the supplied substrate.
    #[must_use]
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl IdempotencyRegistry for KvIdempotencyRegistry {
    async fn claim(&self, payout_id: &PayoutId) -> StoreResult<Claim> {
        let key = format!("idem:{payout_id}");
        if self.kv.set_mark_if_absent(&key, MARK_TTL) {
            Ok(Claim::FirstSeen)
        } else {
            debug!(payout_id = %payout_id, "duplicate payout submission");
            Ok(Claim::AlreadySeen)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_wins_subsequent_are_duplicates() {
        let registry = KvIdempotencyRegistry::new(Arc::new(KvStore::new()));
        let payout = PayoutId::new("pout_claim").unwrap();

        assert_eq!(registry.claim(&payout).await.unwrap(), Claim::FirstSeen);
        assert_eq!(registry.claim(&payout).await.unwrap(), Claim::AlreadySeen);
        assert_eq!(registry.claim(&payout).await.unwrap(), Claim::AlreadySeen);
    }

    #[tokio::test]
    async fn distinct_payouts_claim_independently() {
        let registry = KvIdempotencyRegistry::new(Arc::new(KvStore::new()));
        let first = PayoutId::new("pout_a").unwrap();
        let second = PayoutId::new("pout_b").unwrap();

        assert_eq!(registry.claim(&first).await.unwrap(), Claim::FirstSeen);
        assert_eq!(registry.claim(&second).await.unwrap(), Claim::FirstSeen);
    }
}
