//! Audit sink trait, the durable primary, and the fallback composite.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{error, info};

use payguard_primitives::{AgentId, Decision, PayoutId, ReasonCode};

use crate::error::{AuditError, AuditResult};
use crate::fallback::FileAuditSink;
use crate::record::{AuditRecord, AuditRecordBuilder};

/// Trait implemented by audit sinks.
///
/// A successful `commit` is the terminal act of a decision cycle. Sinks
/// never swallow failures; if a record cannot be persisted anywhere the
/// error reaches the engine and the cycle fails.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Durably appends a record.
    async fn commit(&self, record: &AuditRecord) -> AuditResult<()>;
}

/// Filter for audit queries on the admin surface.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Restrict to a single agent.
    pub agent_id: Option<AgentId>,
    /// Restrict to a single payout.
    pub payout_id: Option<PayoutId>,
    /// Maximum rows returned (default 50).
    pub limit: Option<u32>,
}

/// Durable audit primary backed by SQLite.
///
/// The table keeps a unique index on the payout id, so replayed duplicate
/// observations leave the first terminal record untouched.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    /// Wraps an existing pool. Call [`Self::migrate`] before first use.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `audit_logs` table and its indexes when absent.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn migrate(&self) -> AuditResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                payout_id     TEXT NOT NULL UNIQUE,
                agent_id      TEXT NOT NULL,
                amount        INTEGER NOT NULL,
                currency      TEXT NOT NULL DEFAULT 'USD',
                vendor_name   TEXT,
                vendor_url    TEXT,
                decision      TEXT NOT NULL,
                reason_code   TEXT NOT NULL,
                reason_detail TEXT NOT NULL DEFAULT '',
                threat_tags   TEXT NOT NULL DEFAULT '[]',
                processing_ms INTEGER,
                committed_at  TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_agent ON audit_logs(agent_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_committed ON audit_logs(committed_at)")
            .execute(&self.pool)
            .await?;
        info!("audit store migrated");
        Ok(())
    }

    /// Retrieves records matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn query(&self, filter: &AuditFilter) -> AuditResult<Vec<AuditRecord>> {
        let limit = i64::from(filter.limit.unwrap_or(50));
        let rows = sqlx::query(
            "SELECT payout_id, agent_id, amount, currency, vendor_name, vendor_url,
                    decision, reason_code, reason_detail, threat_tags, processing_ms,
                    committed_at
             FROM audit_logs
             WHERE ($1 IS NULL OR agent_id = $1)
               AND ($2 IS NULL OR payout_id = $2)
             ORDER BY id DESC
             LIMIT $3",
        )
        .bind(filter.agent_id.as_ref().map(AgentId::as_str))
        .bind(filter.payout_id.as_ref().map(PayoutId::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hydrate_record).collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn commit(&self, record: &AuditRecord) -> AuditResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs
                 (payout_id, agent_id, amount, currency, vendor_name, vendor_url,
                  decision, reason_code, reason_detail, threat_tags, processing_ms,
                  committed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (payout_id) DO NOTHING",
        )
        .bind(record.payout_id().as_str())
        .bind(record.agent_id().as_str())
        .bind(record.amount())
        .bind(record.currency())
        .bind(record.vendor_name())
        .bind(record.vendor_url())
        .bind(record.decision().as_str())
        .bind(record.reason_code().as_str())
        .bind(record.reason_detail())
        .bind(serde_json::to_string(record.threat_tags())?)
        .bind(record.processing_ms())
        .bind(record.committed_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(
            payout_id = %record.payout_id(),
            decision = %record.decision(),
            reason = %record.reason_code(),
            "audit committed"
        );
        Ok(())
    }
}

/// Composite sink: durable primary with a filesystem fallback.
pub struct FallbackAuditSink<P> {
    primary: P,
    fallback: FileAuditSink,
    on_fallback: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<P> FallbackAuditSink<P>
where
    P: AuditSink,
{
    /// Combines a primary sink with a file fallback.
    #[must_use]
    pub fn new(primary: P, fallback: FileAuditSink) -> Self {
        Self {
            primary,
            fallback,
            on_fallback: None,
        }
    }

    /// Installs a hook invoked whenever the fallback path engages, used to
    /// surface fallback writes on the metrics surface.
    #[must_use]
    pub fn with_fallback_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_fallback = Some(Box::new(hook));
        self
    }

    /// Returns the wrapped primary sink.
    #[must_use]
    pub const fn primary(&self) -> &P {
        &self.primary
    }
}

#[async_trait]
impl<P> AuditSink for FallbackAuditSink<P>
where
    P: AuditSink,
{
    async fn commit(&self, record: &AuditRecord) -> AuditResult<()> {
        let primary_err = match self.primary.commit(record).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        error!(
            payout_id = %record.payout_id(),
            error = %primary_err,
            "audit primary failed, writing fallback"
        );
        if let Some(hook) = &self.on_fallback {
            hook();
        }
        match self.fallback.commit(record).await {
            Ok(()) => Ok(()),
            Err(fallback_err) => Err(AuditError::AllSinksFailed {
                primary: primary_err.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }
}

fn hydrate_record(row: &sqlx::sqlite::SqliteRow) -> AuditResult<AuditRecord> {
    let payout_id = PayoutId::new(row.get::<String, _>("payout_id"))
        .map_err(|err| AuditError::primary(format!("corrupt payout id: {err}")))?;
    let agent_id = AgentId::new(row.get::<String, _>("agent_id"))
        .map_err(|err| AuditError::primary(format!("corrupt agent id: {err}")))?;
    let decision = parse_decision(&row.get::<String, _>("decision"))?;
    let reason_code = parse_reason(&row.get::<String, _>("reason_code"))?;

    let mut builder: AuditRecordBuilder = AuditRecord::builder(
        payout_id,
        agent_id,
        row.get("amount"),
        decision,
        reason_code,
    )
    .currency(row.get::<String, _>("currency"))
    .reason_detail(row.get::<String, _>("reason_detail"));

    if let Some(name) = row.get::<Option<String>, _>("vendor_name") {
        builder = builder.vendor_name(name);
    }
    if let Some(url) = row.get::<Option<String>, _>("vendor_url") {
        builder = builder.vendor_url(url);
    }
    if let Some(ms) = row.get::<Option<i64>, _>("processing_ms") {
        builder = builder.processing_ms(ms);
    }
    let tags: Vec<String> = serde_json::from_str(&row.get::<String, _>("threat_tags"))?;
    builder = builder.threat_tags(tags);

    let committed_at = chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("committed_at"))
        .map_err(|err| AuditError::primary(format!("corrupt timestamp: {err}")))?
        .with_timezone(&chrono::Utc);
    Ok(builder.committed_at(committed_at).build())
}

fn parse_decision(raw: &str) -> AuditResult<Decision> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|_| AuditError::primary(format!("unknown decision `{raw}`")))
}

fn parse_reason(raw: &str) -> AuditResult<ReasonCode> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|_| AuditError::primary(format!("unknown reason code `{raw}`")))
}
