use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use dao_monitor::data_source::{FeatureFields, FeedbackFields, PerformanceFields, TransactionFields, UserFields};
use dao_monitor::error::DataSourceResult;
use dao_monitor::{ChainDataSource, DataSourceError, MetricCategory, MetricPath};

#[derive(Default, Clone, Copy)]
struct CallStats {
    calls: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Deterministic platform stub.
///
/// Every catalogue field starts at a healthy baseline and can be overridden
/// per path. Queries can be delayed (tokio time, so paused-clock tests
/// advance through them) or made to fail per category.
#[derive(Default)]
pub struct MockDataSource {
    values: Mutex<BTreeMap<MetricPath, f64>>,
    delays: Mutex<HashMap<MetricCategory, Duration>>,
    stats: Mutex<HashMap<MetricCategory, CallStats>>,
    fail_all: AtomicBool,
    failing: Mutex<Vec<MetricCategory>>,
}

impl MockDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override one field, e.g. `set_value("performance.error_rate", 7.2)`
    pub fn set_value(&self, path: &str, value: f64) {
        let path = MetricPath::parse(path).unwrap();
        self.values.lock().unwrap().insert(path, value);
    }

    pub fn set_delay(&self, category: MetricCategory, delay: Duration) {
        self.delays.lock().unwrap().insert(category, delay);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn fail_category(&self, category: MetricCategory) {
        self.failing.lock().unwrap().push(category);
    }

    pub fn calls(&self, category: MetricCategory) -> usize {
        self.stats.lock().unwrap().get(&category).map_or(0, |s| s.calls)
    }

    pub fn total_calls(&self) -> usize {
        self.stats.lock().unwrap().values().map(|s| s.calls).sum()
    }

    /// Highest number of concurrent queries seen for `category`
    pub fn max_in_flight(&self, category: MetricCategory) -> usize {
        self.stats.lock().unwrap().get(&category).map_or(0, |s| s.max_in_flight)
    }

    fn value(&self, category: MetricCategory, field: &str, baseline: f64) -> f64 {
        let path = MetricPath {
            category,
            field: field.to_string(),
        };
        self.values.lock().unwrap().get(&path).copied().unwrap_or(baseline)
    }

    async fn enter(&self, category: MetricCategory) -> DataSourceResult<()> {
        {
            let mut stats = self.stats.lock().unwrap();
            let entry = stats.entry(category).or_default();
            entry.calls += 1;
            entry.in_flight += 1;
            entry.max_in_flight = entry.max_in_flight.max(entry.in_flight);
        }

        let delay = self.delays.lock().unwrap().get(&category).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.stats.lock().unwrap().entry(category).or_default().in_flight -= 1;

        let failing = self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&category);
        if failing {
            return Err(DataSourceError::DataUnavailable {
                category,
                reason: "platform endpoint unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDataSource for MockDataSource {
    async fn user_metrics(&self) -> DataSourceResult<UserFields> {
        let c = MetricCategory::User;
        self.enter(c).await?;
        Ok(UserFields {
            total_users: self.value(c, "total_users", 1500.0),
            active_users: self.value(c, "active_users", 420.0),
            new_users: self.value(c, "new_users", 18.0),
            retention_rate: self.value(c, "retention_rate", 78.0),
        })
    }

    async fn transaction_metrics(&self) -> DataSourceResult<TransactionFields> {
        let c = MetricCategory::Transaction;
        self.enter(c).await?;
        Ok(TransactionFields {
            total_transactions: self.value(c, "total_transactions", 900.0),
            successful_transactions: self.value(c, "successful_transactions", 891.0),
            failed_transactions: self.value(c, "failed_transactions", 9.0),
            average_gas_used: self.value(c, "average_gas_used", 52000.0),
            success_rate: self.value(c, "success_rate", 99.0),
        })
    }

    async fn feature_adoption_metrics(&self) -> DataSourceResult<FeatureFields> {
        let c = MetricCategory::FeatureAdoption;
        self.enter(c).await?;
        Ok(FeatureFields {
            proposals_created: self.value(c, "proposals_created", 4.0),
            votes_cast: self.value(c, "votes_cast", 230.0),
            delegations: self.value(c, "delegations", 17.0),
            treasury_operations: self.value(c, "treasury_operations", 2.0),
            staking_operations: self.value(c, "staking_operations", 35.0),
        })
    }

    async fn performance_metrics(&self) -> DataSourceResult<PerformanceFields> {
        let c = MetricCategory::Performance;
        self.enter(c).await?;
        Ok(PerformanceFields {
            response_time_ms: self.value(c, "response_time_ms", 210.0),
            error_rate: self.value(c, "error_rate", 0.4),
            throughput: self.value(c, "throughput", 55.0),
            uptime: self.value(c, "uptime", 99.95),
        })
    }

    async fn feedback_metrics(&self) -> DataSourceResult<FeedbackFields> {
        let c = MetricCategory::Feedback;
        self.enter(c).await?;
        Ok(FeedbackFields {
            satisfaction_score: self.value(c, "satisfaction_score", 4.3),
            bug_reports: self.value(c, "bug_reports", 3.0),
            feature_requests: self.value(c, "feature_requests", 6.0),
            support_tickets: self.value(c, "support_tickets", 11.0),
        })
    }
}
