//! Durable policy storage.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use thiserror::Error;
use tracing::info;

use payguard_primitives::AgentId;

use crate::policy::{AgentPolicy, PolicyValidationError};

/// Errors surfaced by policy stores.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The backing store failed.
    #[error("policy store backend failure: {reason}")]
    Backend {
        /// Human-readable explanation for logging and operators.
        reason: String,
    },
    /// A stored row failed invariant validation on hydration.
    #[error(transparent)]
    Invalid(#[from] PolicyValidationError),
}

impl PolicyError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for PolicyError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend(err.to_string())
    }
}

/// Result alias for policy store operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Trait implemented by durable policy stores.
///
/// A missing policy is a valid outcome: it signals that no governance has
/// been configured for the agent and the engine rejects with `NO_POLICY`.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetches the policy for an agent, or `None` when unconfigured.
    async fn get(&self, agent_id: &AgentId) -> PolicyResult<Option<AgentPolicy>>;

    /// Creates or replaces the policy for its agent.
    async fn upsert(&self, policy: &AgentPolicy) -> PolicyResult<()>;
}

/// SQLite-backed policy store using an sqlx async pool.
pub struct SqlitePolicyStore {
    pool: SqlitePool,
}

impl SqlitePolicyStore {
    /// Wraps an existing pool. Call [`Self::migrate`] before first use.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `agent_policies` table when absent.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn migrate(&self) -> PolicyResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_policies (
                agent_id           TEXT PRIMARY KEY,
                daily_cap          INTEGER NOT NULL,
                per_txn_cap        INTEGER,
                approval_threshold INTEGER,
                allowed_domains    TEXT NOT NULL DEFAULT '[]',
                blocked_domains    TEXT NOT NULL DEFAULT '[]',
                created_at         TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;
        info!("policy store migrated");
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn get(&self, agent_id: &AgentId) -> PolicyResult<Option<AgentPolicy>> {
        let row = sqlx::query(
            "SELECT agent_id, daily_cap, per_txn_cap, approval_threshold,
                    allowed_domains, blocked_domains, created_at, updated_at
             FROM agent_policies WHERE agent_id = $1",
        )
        .bind(agent_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let agent_id: String = row.get("agent_id");
        let agent_id = AgentId::new(agent_id)
            .map_err(|err| PolicyError::backend(format!("corrupt agent id: {err}")))?;

        let mut builder = AgentPolicy::builder(agent_id, row.get("daily_cap"));
        if let Some(cap) = row.get::<Option<i64>, _>("per_txn_cap") {
            builder = builder.per_txn_cap(cap);
        }
        if let Some(threshold) = row.get::<Option<i64>, _>("approval_threshold") {
            builder = builder.approval_threshold(threshold);
        }
        for domain in decode_domains(&row.get::<String, _>("allowed_domains"))? {
            builder = builder.allow_domain(domain);
        }
        for domain in decode_domains(&row.get::<String, _>("blocked_domains"))? {
            builder = builder.block_domain(domain);
        }
        builder = builder.timestamps(
            parse_timestamp(row.get::<Option<String>, _>("created_at")),
            parse_timestamp(row.get::<Option<String>, _>("updated_at")),
        );

        Ok(Some(builder.build()?))
    }

    async fn upsert(&self, policy: &AgentPolicy) -> PolicyResult<()> {
        sqlx::query(
            "INSERT INTO agent_policies
                 (agent_id, daily_cap, per_txn_cap, approval_threshold,
                  allowed_domains, blocked_domains, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, datetime('now'))
             ON CONFLICT (agent_id) DO UPDATE SET
                 daily_cap = excluded.daily_cap,
                 per_txn_cap = excluded.per_txn_cap,
                 approval_threshold = excluded.approval_threshold,
                 allowed_domains = excluded.allowed_domains,
                 blocked_domains = excluded.blocked_domains,
                 updated_at = datetime('now')",
        )
        .bind(policy.agent_id().as_str())
        .bind(policy.daily_cap())
        .bind(policy.per_txn_cap())
        .bind(policy.approval_threshold())
        .bind(encode_domains(policy.allowed_domains()))
        .bind(encode_domains(policy.blocked_domains()))
        .execute(&self.pool)
        .await?;

        info!(agent_id = %policy.agent_id(), "policy upserted");
        Ok(())
    }
}

fn encode_domains(domains: &[String]) -> String {
    serde_json::to_string(domains).unwrap_or_else(|_| "[]".to_owned())
}

fn decode_domains(raw: &str) -> PolicyResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|err| PolicyError::backend(format!("corrupt domain list: {err}")))
}

fn parse_timestamp(raw: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{NaiveDateTime, TimeZone, Utc};
    let raw = raw?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
