//! Atomic per-agent daily budget accounting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use payguard_primitives::AgentId;

use crate::kv::KvStore;
use crate::StoreResult;

/// Counters expire 25 hours after their first write, which covers the UTC
/// day plus timezone skew on the surrounding tooling.
const COUNTER_TTL: Duration = Duration::from_secs(25 * 60 * 60);

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Capacity was reserved; the counter now reads `new_total`.
    Reserved {
        /// Counter value after the reservation.
        new_total: i64,
    },
    /// The reservation would exceed the cap; the counter is unchanged.
    Denied {
        /// Counter value at the time of denial.
        current: i64,
    },
}

impl ReserveOutcome {
    /// Returns `true` when the reservation succeeded.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        matches!(self, Self::Reserved { .. })
    }
}

/// Trait implemented by budget ledgers.
///
/// `reserve` must be atomic with respect to concurrent callers for the same
/// agent: the check against the cap and the increment are one indivisible
/// step. Implementations must fail closed when the substrate is unreachable.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Atomically reserves `amount` against the agent's daily cap.
    async fn reserve(
        &self,
        agent_id: &AgentId,
        amount: i64,
        daily_cap: i64,
    ) -> StoreResult<ReserveOutcome>;

    /// Releases a prior reservation of exactly `amount`.
    ///
    /// Must only be invoked by the caller that reserved the same amount
    /// within the same decision cycle.
    async fn rollback(&self, agent_id: &AgentId, amount: i64) -> StoreResult<()>;

    /// Returns the reserved total for the current UTC day (0 when absent).
    async fn current(&self, agent_id: &AgentId) -> StoreResult<i64>;
}

/// Budget ledger backed by the shared key/value substrate.
///
/// Keys are day-bounded (`budget:{agent}:{yyyymmdd}` in UTC) so counters
/// self-expire without a cleanup job.
pub struct KvBudgetLedger {
    kv: Arc<KvStore>,
}

impl KvBudgetLedger {
    /// Creates a ledger on the supplied substrate.
    #[must_use]
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn day_key(agent_id: &AgentId) -> String {
        format!("budget:{}:{}", agent_id, Utc::now().format("%Y%m%d"))
    }
}

#[async_trait]
impl BudgetLedger for KvBudgetLedger {
    async fn reserve(
        &self,
        agent_id: &AgentId,
        amount: i64,
        daily_cap: i64,
    ) -> StoreResult<ReserveOutcome> {
        let key = Self::day_key(agent_id);
        match self.kv.incr_capped(&key, amount, daily_cap, COUNTER_TTL) {
            Ok(new_total) => {
                info!(agent_id = %agent_id, new_total, daily_cap, "budget reserved");
                Ok(ReserveOutcome::Reserved { new_total })
            }
            Err(current) => {
                warn!(
                    agent_id = %agent_id,
                    current,
                    amount,
                    daily_cap,
                    "budget reservation denied"
                );
                Ok(ReserveOutcome::Denied { current })
            }
        }
    }

    async fn rollback(&self, agent_id: &AgentId, amount: i64) -> StoreResult<()> {
        let key = Self::day_key(agent_id);
        self.kv.decr(&key, amount);
        info!(agent_id = %agent_id, amount, "budget reservation rolled back");
        Ok(())
    }

    async fn current(&self, agent_id: &AgentId) -> StoreResult<i64> {
        Ok(self.kv.counter(&Self::day_key(agent_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::new("agent-budget").unwrap()
    }

    #[tokio::test]
    async fn reserve_up_to_cap_then_deny() {
        let ledger = KvBudgetLedger::new(Arc::new(KvStore::new()));
        let agent = agent();

        let first = ledger.reserve(&agent, 450_000, 500_000).await.unwrap();
        assert_eq!(first, ReserveOutcome::Reserved { new_total: 450_000 });

        let denied = ledger.reserve(&agent, 75_000, 500_000).await.unwrap();
        assert_eq!(denied, ReserveOutcome::Denied { current: 450_000 });
        assert_eq!(ledger.current(&agent).await.unwrap(), 450_000);
    }

    #[tokio::test]
    async fn exact_cap_reservation_is_allowed() {
        let ledger = KvBudgetLedger::new(Arc::new(KvStore::new()));
        let agent = agent();

        let outcome = ledger.reserve(&agent, 500_000, 500_000).await.unwrap();
        assert!(outcome.is_reserved());
        assert_eq!(ledger.current(&agent).await.unwrap(), 500_000);
    }

    #[tokio::test]
    async fn rollback_releases_reserved_amount() {
        let ledger = KvBudgetLedger::new(Arc::new(KvStore::new()));
        let agent = agent();

        ledger.reserve(&agent, 30_000, 500_000).await.unwrap();
        ledger.rollback(&agent, 30_000).await.unwrap();
        assert_eq!(ledger.current(&agent).await.unwrap(), 0);

        let again = ledger.reserve(&agent, 500_000, 500_000).await.unwrap();
        assert!(again.is_reserved());
    }

    #[tokio::test]
    async fn concurrent_reservations_admit_exactly_cap_worth() {
        let ledger = Arc::new(KvBudgetLedger::new(Arc::new(KvStore::new())));
        let agent = agent();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .reserve(&agent, 1_000, 10_000)
                    .await
                    .unwrap()
                    .is_reserved()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(ledger.current(&agent).await.unwrap(), 10_000);
    }
}
