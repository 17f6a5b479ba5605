//! Advisory per-agent transaction anomaly scoring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use payguard_primitives::AgentId;

/// Result of scoring one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyScore {
    /// Risk in `[0, 1]`; 1.0 is most anomalous.
    pub risk_score: f64,
    /// Whether the risk crossed the configured threshold.
    pub anomalous: bool,
    /// Whether a trained model produced the score (false below the sample
    /// minimum, where a neutral score is returned).
    pub model_trained: bool,
    /// Samples available when the score was produced.
    pub training_samples: usize,
    /// Human-readable explanation for audit enrichment.
    pub detail: String,
}

impl AnomalyScore {
    fn neutral(samples: usize, min_samples: usize) -> Self {
        Self {
            risk_score: 0.5,
            anomalous: false,
            model_trained: false,
            training_samples: samples,
            detail: format!(
                "insufficient history ({samples}/{min_samples} samples), neutral score"
            ),
        }
    }
}

/// Aggregate transaction profile for an agent, served on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRiskProfile {
    /// Profiled agent.
    pub agent_id: AgentId,
    /// Transactions in the bounded history window.
    pub total_transactions: usize,
    /// Mean amount in minor units.
    pub mean_amount: i64,
    /// Smallest observed amount.
    pub min_amount: i64,
    /// Largest observed amount.
    pub max_amount: i64,
    /// Hour of day (UTC) with the most activity, when history exists.
    pub most_active_hour: Option<u8>,
}

/// Trait implemented by anomaly scorers.
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    /// Scores a transaction and records it in the agent's history.
    async fn score(&self, agent_id: &AgentId, amount: i64, timestamp: DateTime<Utc>)
        -> AnomalyScore;

    /// Returns the aggregate profile for an agent.
    async fn profile(&self, agent_id: &AgentId) -> AgentRiskProfile;
}

/// Scorer tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct ScorerConfig {
    /// Samples required before a model is trained.
    pub min_samples: usize,
    /// Bounded history length per agent.
    pub max_history: usize,
    /// New samples accepted before the cached model is retrained.
    pub retrain_every: usize,
    /// Risk at or above this value is flagged anomalous.
    pub risk_threshold: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            max_history: 1000,
            retrain_every: 10,
            risk_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FeatureRow {
    amount: i64,
    amount_log: f64,
    hour: u8,
}

/// Cached per-agent model: rolling statistics over the feature history.
#[derive(Debug, Clone)]
struct AmountModel {
    mean_log: f64,
    std_log: f64,
    hour_counts: [u32; 24],
    total: u32,
    trained_at_samples: usize,
}

impl AmountModel {
    #[allow(clippy::cast_precision_loss)]
    fn train(rows: &[FeatureRow]) -> Self {
        let n = rows.len() as f64;
        let mean_log = rows.iter().map(|r| r.amount_log).sum::<f64>() / n;
        let variance = rows
            .iter()
            .map(|r| (r.amount_log - mean_log).powi(2))
            .sum::<f64>()
            / n;
        let mut hour_counts = [0_u32; 24];
        for row in rows {
            hour_counts[usize::from(row.hour)] += 1;
        }
        Self {
            mean_log,
            std_log: variance.sqrt(),
            hour_counts,
            total: u32::try_from(rows.len()).unwrap_or(u32::MAX),
            trained_at_samples: rows.len(),
        }
    }

    fn zscore(&self, amount_log: f64) -> f64 {
        (amount_log - self.mean_log) / self.std_log.max(0.001)
    }

    fn hour_rarity(&self, hour: u8) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let freq = f64::from(self.hour_counts[usize::from(hour)]) / f64::from(self.total);
        1.0 - (freq * 24.0).min(1.0)
    }
}

#[derive(Debug, Default)]
struct AgentHistory {
    rows: VecDeque<FeatureRow>,
    model: Option<AmountModel>,
}

/// Process-local anomaly scorer over bounded per-agent histories.
///
/// Feature vector per event: log-amount, hour-of-day, day-of-week, and the
/// amount z-score against the agent's rolling statistics. The z-score is
/// computed from prior history before the new event is recorded, so stored
/// samples are never contaminated by placeholder values. Scoring runs on
/// the blocking worker pool, off the governance request task.
pub struct HistoryAnomalyScorer {
    config: ScorerConfig,
    histories: Mutex<HashMap<AgentId, AgentHistory>>,
}

impl HistoryAnomalyScorer {
    /// Creates a scorer with the supplied configuration.
    #[must_use]
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            histories: Mutex::new(HashMap::new()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn features(amount: i64, timestamp: DateTime<Utc>) -> FeatureRow {
        FeatureRow {
            amount,
            amount_log: (amount.max(1) as f64).log10(),
            hour: u8::try_from(timestamp.hour()).unwrap_or(0),
        }
    }

    fn compute_score(
        config: ScorerConfig,
        model: &AmountModel,
        row: FeatureRow,
        weekday: u8,
        samples: usize,
    ) -> AnomalyScore {
        let zscore = model.zscore(row.amount_log);
        let amount_component = (zscore.abs() / 4.0).min(1.0);
        let hour_component = 0.5 * model.hour_rarity(row.hour);
        let risk_score = (1.0 - (1.0 - amount_component) * (1.0 - hour_component)).clamp(0.0, 1.0);
        let anomalous = risk_score >= config.risk_threshold;

        let detail = if anomalous {
            let mut contributing = Vec::new();
            if zscore.abs() > 2.0 {
                contributing.push(format!("unusual amount (z={zscore:.1})"));
            }
            if model.hour_rarity(row.hour) > 0.5 {
                contributing.push(format!("unusual hour ({}:00 UTC)", row.hour));
            }
            if contributing.is_empty() {
                contributing.push("multi-feature deviation".to_owned());
            }
            format!("anomaly detected: {}", contributing.join(", "))
        } else {
            "transaction appears normal".to_owned()
        };

        debug!(
            risk_score,
            zscore,
            hour = row.hour,
            weekday,
            samples,
            "anomaly score computed"
        );

        AnomalyScore {
            risk_score,
            anomalous,
            model_trained: true,
            training_samples: samples,
            detail,
        }
    }
}

impl Default for HistoryAnomalyScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

#[async_trait]
impl AnomalyScorer for HistoryAnomalyScorer {
    async fn score(
        &self,
        agent_id: &AgentId,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> AnomalyScore {
        let row = Self::features(amount, timestamp);
        let weekday = u8::try_from(timestamp.weekday().num_days_from_monday()).unwrap_or(0);
        let config = self.config;

        // Snapshot prior history under the lock; the new row is recorded
        // only after the score is computed from that snapshot.
        let (snapshot, cached_model) = {
            let mut histories = self.histories.lock().await;
            let history = histories.entry(agent_id.clone()).or_default();
            (
                history.rows.iter().copied().collect::<Vec<_>>(),
                history.model.clone(),
            )
        };

        let samples = snapshot.len();
        let score = if samples < config.min_samples {
            AnomalyScore::neutral(samples, config.min_samples)
        } else {
            let stale = cached_model.as_ref().map_or(true, |model| {
                samples.saturating_sub(model.trained_at_samples) >= config.retrain_every
            });
            let model = if stale { None } else { cached_model.clone() };

            let result = tokio::task::spawn_blocking(move || {
                let model = model.unwrap_or_else(|| AmountModel::train(&snapshot));
                let score = HistoryAnomalyScorer::compute_score(
                    config, &model, row, weekday, samples,
                );
                (model, score)
            })
            .await;

            match result {
                Ok((model, score)) => {
                    let mut histories = self.histories.lock().await;
                    let history = histories.entry(agent_id.clone()).or_default();
                    history.model = Some(model);
                    score
                }
                Err(err) => {
                    debug!(error = %err, "anomaly scoring task failed, neutral score");
                    AnomalyScore::neutral(samples, config.min_samples)
                }
            }
        };

        let mut histories = self.histories.lock().await;
        let history = histories.entry(agent_id.clone()).or_default();
        history.rows.push_back(row);
        while history.rows.len() > config.max_history {
            history.rows.pop_front();
        }

        score
    }

    async fn profile(&self, agent_id: &AgentId) -> AgentRiskProfile {
        let histories = self.histories.lock().await;
        let rows = histories
            .get(agent_id)
            .map(|history| history.rows.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();

        if rows.is_empty() {
            return AgentRiskProfile {
                agent_id: agent_id.clone(),
                total_transactions: 0,
                mean_amount: 0,
                min_amount: 0,
                max_amount: 0,
                most_active_hour: None,
            };
        }

        let total: i64 = rows.iter().map(|r| r.amount).sum();
        let mut hour_counts = [0_u32; 24];
        for row in &rows {
            hour_counts[usize::from(row.hour)] += 1;
        }
        let most_active_hour = hour_counts
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(hour, _)| u8::try_from(hour).unwrap_or(0));

        AgentRiskProfile {
            agent_id: agent_id.clone(),
            total_transactions: rows.len(),
            mean_amount: total / i64::try_from(rows.len()).unwrap_or(1),
            min_amount: rows.iter().map(|r| r.amount).min().unwrap_or(0),
            max_amount: rows.iter().map(|r| r.amount).max().unwrap_or(0),
            most_active_hour,
        }
    }
}
