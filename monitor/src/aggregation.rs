//! Hourly, daily and weekly usage rollups
//!
//! Each rollup summarizes every field of every category over the trailing
//! period and is compared with the previous rollup of the same period to
//! detect error spikes and performance degradation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::alert::{AlertSeverity, AlertType, CandidateAlert};
use crate::config::AggregationConfig;
use crate::sample::{MetricCategory, MetricPath};
use crate::store::{MetricStore, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupPeriod {
    Hourly,
    Daily,
    Weekly,
}

impl RollupPeriod {
    pub const ALL: [RollupPeriod; 3] = [RollupPeriod::Hourly, RollupPeriod::Daily, RollupPeriod::Weekly];

    pub fn span(&self) -> chrono::Duration {
        match self {
            RollupPeriod::Hourly => chrono::Duration::hours(1),
            RollupPeriod::Daily => chrono::Duration::days(1),
            RollupPeriod::Weekly => chrono::Duration::weeks(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RollupPeriod::Hourly => "hourly",
            RollupPeriod::Daily => "daily",
            RollupPeriod::Weekly => "weekly",
        }
    }
}

impl fmt::Display for RollupPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one field over a period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub last: f64,
    /// `last - first`
    pub delta: f64,
}

impl FieldSummary {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut summary: Option<(FieldSummary, f64, f64)> = None;

        for value in values {
            summary = Some(match summary {
                None => (
                    FieldSummary {
                        count: 1,
                        min: value,
                        max: value,
                        mean: value,
                        last: value,
                        delta: 0.0,
                    },
                    value,
                    value,
                ),
                Some((mut s, first, sum)) => {
                    s.count += 1;
                    s.min = s.min.min(value);
                    s.max = s.max.max(value);
                    s.last = value;
                    (s, first, sum + value)
                }
            });
        }

        summary.map(|(mut s, first, sum)| {
            s.mean = sum / s.count as f64;
            s.delta = s.last - first;
            s
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRollup {
    pub period: RollupPeriod,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub categories: BTreeMap<MetricCategory, BTreeMap<String, FieldSummary>>,
}

impl UsageRollup {
    /// Summarize the trailing `period` ending at `now`
    pub async fn build(store: &MetricStore, period: RollupPeriod, now: DateTime<Utc>) -> Self {
        let start = now - period.span();
        let range = TimeRange::between(start, now);

        let mut categories = BTreeMap::new();
        for category in MetricCategory::ALL {
            let snapshot = store.query(category, range).await;
            let mut fields = BTreeMap::new();
            for field in category.known_fields() {
                if let Some(summary) = FieldSummary::from_values(snapshot.values(field)) {
                    fields.insert(field.to_string(), summary);
                }
            }
            if !fields.is_empty() {
                categories.insert(category, fields);
            }
        }

        Self {
            period,
            start,
            end: now,
            categories,
        }
    }

    pub fn field(&self, path: &MetricPath) -> Option<&FieldSummary> {
        self.categories.get(&path.category)?.get(&path.field)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

pub struct Aggregator {
    config: AggregationConfig,
    history: RwLock<HashMap<RollupPeriod, VecDeque<UsageRollup>>>,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Build, record and compare one rollup
    pub async fn run(&self, store: &MetricStore, period: RollupPeriod, now: DateTime<Utc>) -> Vec<CandidateAlert> {
        let rollup = UsageRollup::build(store, period, now).await;
        let previous = self.record(rollup.clone()).await;

        info!(
            %period,
            categories = rollup.categories.len(),
            "Built usage rollup"
        );

        match previous {
            Some(previous) => self.compare(&previous, &rollup),
            None => Vec::new(),
        }
    }

    /// Store a rollup, returning the previous one of the same period
    pub async fn record(&self, rollup: UsageRollup) -> Option<UsageRollup> {
        let mut history = self.history.write().await;
        let entries = history.entry(rollup.period).or_default();
        let previous = entries.back().cloned();
        entries.push_back(rollup);
        while entries.len() > self.config.max_rollups.max(1) {
            entries.pop_front();
        }
        previous
    }

    pub async fn latest(&self, period: RollupPeriod) -> Option<UsageRollup> {
        self.history.read().await.get(&period).and_then(|entries| entries.back().cloned())
    }

    /// Oldest first
    pub async fn rollups(&self, period: RollupPeriod) -> Vec<UsageRollup> {
        self.history
            .read()
            .await
            .get(&period)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn compare(&self, previous: &UsageRollup, current: &UsageRollup) -> Vec<CandidateAlert> {
        let mut candidates = Vec::new();
        let period = current.period;

        let error_rate = MetricPath {
            category: MetricCategory::Performance,
            field: "error_rate".to_string(),
        };
        if let (Some(prev), Some(curr)) = (previous.field(&error_rate), current.field(&error_rate)) {
            if curr.mean > self.config.error_rate_floor && curr.mean >= self.config.error_spike_ratio * prev.mean {
                candidates.push(
                    CandidateAlert::new(
                        AlertType::ErrorSpike,
                        AlertSeverity::High,
                        error_rate.to_string(),
                        format!("Error rate spike ({})", period),
                    )
                    .with_description(format!(
                        "Mean error rate rose from {:.2} to {:.2} over the last {} period",
                        prev.mean, curr.mean, period
                    ))
                    .with_metric("previousMean", prev.mean)
                    .with_metric("currentMean", curr.mean),
                );
            }
        }

        let response_time = MetricPath {
            category: MetricCategory::Performance,
            field: "response_time_ms".to_string(),
        };
        if let (Some(prev), Some(curr)) = (previous.field(&response_time), current.field(&response_time)) {
            if prev.mean > 0.0 && curr.mean >= self.config.degradation_ratio * prev.mean {
                candidates.push(
                    CandidateAlert::new(
                        AlertType::PerformanceDegradation,
                        AlertSeverity::Medium,
                        response_time.to_string(),
                        format!("Response time degraded ({})", period),
                    )
                    .with_description(format!(
                        "Mean response time rose from {:.0}ms to {:.0}ms",
                        prev.mean, curr.mean
                    ))
                    .with_metric("previousMean", prev.mean)
                    .with_metric("currentMean", curr.mean),
                );
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MetricSample;
    use std::time::Duration;

    async fn append_perf(store: &MetricStore, at: DateTime<Utc>, error_rate: f64, response_time_ms: f64) {
        let mut fields = BTreeMap::new();
        fields.insert("error_rate".to_string(), error_rate);
        fields.insert("response_time_ms".to_string(), response_time_ms);
        store
            .append(
                MetricSample::new(MetricCategory::Performance, at, fields),
                Duration::from_secs(7 * 86400),
                at,
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_field_summary() {
        let summary = FieldSummary::from_values([4.0, 2.0, 9.0, 5.0].into_iter()).unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.last, 5.0);
        assert_eq!(summary.delta, 1.0);
        assert!(FieldSummary::from_values(std::iter::empty()).is_none());
    }

    #[tokio::test]
    async fn test_rollup_covers_trailing_period_only() {
        let store = MetricStore::new();
        let now = Utc::now();
        append_perf(&store, now - chrono::Duration::hours(3), 50.0, 100.0).await;
        append_perf(&store, now - chrono::Duration::minutes(30), 1.0, 100.0).await;
        append_perf(&store, now - chrono::Duration::minutes(10), 3.0, 300.0).await;

        let rollup = UsageRollup::build(&store, RollupPeriod::Hourly, now).await;
        let error_rate = rollup.field(&MetricPath::parse("performance.error_rate").unwrap()).unwrap();
        assert_eq!(error_rate.count, 2);
        assert_eq!(error_rate.mean, 2.0);
        assert!(!rollup.categories.contains_key(&MetricCategory::User));
    }

    #[tokio::test]
    async fn test_spike_and_degradation_against_previous_rollup() {
        let aggregator = Aggregator::new(AggregationConfig::default());
        let store = MetricStore::new();
        let t0 = Utc::now() - chrono::Duration::hours(2);

        append_perf(&store, t0 - chrono::Duration::minutes(30), 1.0, 200.0).await;
        assert!(aggregator.run(&store, RollupPeriod::Hourly, t0).await.is_empty());

        let t1 = t0 + chrono::Duration::hours(1);
        append_perf(&store, t1 - chrono::Duration::minutes(30), 4.0, 400.0).await;
        let candidates = aggregator.run(&store, RollupPeriod::Hourly, t1).await;

        let types: Vec<AlertType> = candidates.iter().map(|c| c.alert_type).collect();
        assert!(types.contains(&AlertType::ErrorSpike));
        assert!(types.contains(&AlertType::PerformanceDegradation));
        assert_eq!(aggregator.rollups(RollupPeriod::Hourly).await.len(), 2);
        assert!(aggregator.latest(RollupPeriod::Daily).await.is_none());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let aggregator = Aggregator::new(AggregationConfig {
            max_rollups: 2,
            ..AggregationConfig::default()
        });
        let store = MetricStore::new();
        let now = Utc::now();
        for i in 0..5 {
            aggregator
                .run(&store, RollupPeriod::Weekly, now + chrono::Duration::seconds(i))
                .await;
        }
        let rollups = aggregator.rollups(RollupPeriod::Weekly).await;
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[1].end, now + chrono::Duration::seconds(4));
    }
}
