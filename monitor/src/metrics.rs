//! Self-instrumentation for the monitoring engine
//!
//! Counters and gauges live on a private Prometheus registry so several
//! engines (tests, embedded use) never collide on the global one.

use std::time::{Duration, Instant};

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MonitorError, Result};
use crate::sample::MetricCategory;

/// Engine metrics registered on a private registry
pub struct EngineMetrics {
    registry: Registry,
    counters: EngineCounters,
    start_time: Instant,
}

#[derive(Clone)]
pub struct EngineCounters {
    // Collection
    pub samples_collected: IntCounterVec,
    pub collection_failures: IntCounterVec,
    pub samples_pruned: IntCounterVec,
    pub series_length: IntGaugeVec,

    // Alerting
    pub alerts_raised: IntCounterVec,
    pub alerts_deduplicated: IntCounter,
    pub alerts_resolved: IntCounter,
    pub alerts_pruned: IntCounter,
    pub dispatch_failures: IntCounterVec,

    // Scheduling
    pub task_runs: IntCounterVec,
    pub task_failures: IntCounterVec,
    pub ticks_skipped: IntCounterVec,
    pub task_duration: Histogram,
}

/// Point-in-time summary used by the JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub samples_collected: u64,
    pub collection_failures: u64,
    pub samples_pruned: u64,
    pub alerts_raised: u64,
    pub alerts_deduplicated: u64,
    pub alerts_resolved: u64,
    pub alerts_pruned: u64,
    pub dispatch_failures: u64,
    pub task_runs: u64,
    pub task_failures: u64,
    pub ticks_skipped: u64,
    /// Average task duration in milliseconds
    pub avg_task_duration_ms: f64,
    pub uptime_secs: u64,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let counters = EngineCounters::new(&registry)?;

        Ok(Self {
            registry,
            counters,
            start_time: Instant::now(),
        })
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn record_sample(&self, category: MetricCategory, pruned: usize) {
        self.counters.samples_collected.with_label_values(&[category.as_str()]).inc();
        self.record_pruned(category, pruned);
    }

    pub fn record_pruned(&self, category: MetricCategory, pruned: usize) {
        if pruned > 0 {
            self.counters
                .samples_pruned
                .with_label_values(&[category.as_str()])
                .inc_by(pruned as u64);
        }
    }

    pub fn record_collection_failure(&self, category: MetricCategory) {
        self.counters.collection_failures.with_label_values(&[category.as_str()]).inc();
    }

    pub fn set_series_length(&self, category: MetricCategory, len: usize) {
        self.counters
            .series_length
            .with_label_values(&[category.as_str()])
            .set(len as i64);
    }

    pub fn record_alert_raised(&self, alert_type: &str) {
        self.counters.alerts_raised.with_label_values(&[alert_type]).inc();
    }

    pub fn record_alert_deduplicated(&self) {
        self.counters.alerts_deduplicated.inc();
    }

    pub fn record_alert_resolved(&self) {
        self.counters.alerts_resolved.inc();
    }

    pub fn record_alerts_pruned(&self, count: usize) {
        self.counters.alerts_pruned.inc_by(count as u64);
    }

    pub fn record_dispatch_failure(&self, channel: &str) {
        self.counters.dispatch_failures.with_label_values(&[channel]).inc();
    }

    pub fn record_task_run(&self, task: &str, duration: Duration, failed: bool) {
        self.counters.task_runs.with_label_values(&[task]).inc();
        self.counters.task_duration.observe(duration.as_secs_f64());
        if failed {
            self.counters.task_failures.with_label_values(&[task]).inc();
        }
    }

    pub fn record_ticks_skipped(&self, task: &str, count: u64) {
        if count > 0 {
            self.counters.ticks_skipped.with_label_values(&[task]).inc_by(count);
        }
    }

    pub fn task_runs(&self, task: &str) -> u64 {
        self.counters.task_runs.with_label_values(&[task]).get()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        let runs = c.task_duration.get_sample_count();
        let avg_task_duration_ms = if runs > 0 {
            c.task_duration.get_sample_sum() / runs as f64 * 1000.0
        } else {
            0.0
        };

        EngineStats {
            samples_collected: sum_labels(&c.samples_collected, MetricCategory::ALL.iter().map(|c| c.as_str())),
            collection_failures: sum_labels(&c.collection_failures, MetricCategory::ALL.iter().map(|c| c.as_str())),
            samples_pruned: sum_labels(&c.samples_pruned, MetricCategory::ALL.iter().map(|c| c.as_str())),
            alerts_raised: sum_family(&self.registry, "dao_monitor_alerts_raised_total"),
            alerts_deduplicated: c.alerts_deduplicated.get(),
            alerts_resolved: c.alerts_resolved.get(),
            alerts_pruned: c.alerts_pruned.get(),
            dispatch_failures: sum_family(&self.registry, "dao_monitor_dispatch_failures_total"),
            task_runs: sum_family(&self.registry, "dao_monitor_task_runs_total"),
            task_failures: sum_family(&self.registry, "dao_monitor_task_failures_total"),
            ticks_skipped: sum_family(&self.registry, "dao_monitor_ticks_skipped_total"),
            avg_task_duration_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in the given format (`prometheus` or `json`)
    pub fn export(&self, format: &str) -> Result<String> {
        match format {
            "prometheus" => {
                let encoder = TextEncoder::new();
                let families = self.registry.gather();
                let mut buffer = Vec::new();
                encoder.encode(&families, &mut buffer)?;
                String::from_utf8(buffer).map_err(|e| MonitorError::Generic(e.to_string()))
            }
            "json" => {
                let combined = serde_json::json!({
                    "engine_stats": self.stats(),
                    "timestamp": chrono::Utc::now().timestamp(),
                });
                Ok(serde_json::to_string_pretty(&combined)?)
            }
            other => Err(ConfigError::InvalidValue {
                field: "metrics.export_format".to_string(),
                value: other.to_string(),
            }
            .into()),
        }
    }
}

fn sum_labels<'a>(vec: &IntCounterVec, labels: impl Iterator<Item = &'a str>) -> u64 {
    labels.map(|label| vec.with_label_values(&[label]).get()).sum()
}

fn sum_family(registry: &Registry, name: &str) -> u64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

impl EngineCounters {
    fn new(registry: &Registry) -> Result<Self> {
        let samples_collected = IntCounterVec::new(
            Opts::new("dao_monitor_samples_collected_total", "Samples appended to the store"),
            &["category"],
        )?;
        registry.register(Box::new(samples_collected.clone()))?;

        let collection_failures = IntCounterVec::new(
            Opts::new("dao_monitor_collection_failures_total", "Skipped collection cycles"),
            &["category"],
        )?;
        registry.register(Box::new(collection_failures.clone()))?;

        let samples_pruned = IntCounterVec::new(
            Opts::new("dao_monitor_samples_pruned_total", "Samples removed by retention"),
            &["category"],
        )?;
        registry.register(Box::new(samples_pruned.clone()))?;

        let series_length = IntGaugeVec::new(
            Opts::new("dao_monitor_series_length", "Samples currently held per category"),
            &["category"],
        )?;
        registry.register(Box::new(series_length.clone()))?;

        let alerts_raised = IntCounterVec::new(
            Opts::new("dao_monitor_alerts_raised_total", "Alerts persisted"),
            &["type"],
        )?;
        registry.register(Box::new(alerts_raised.clone()))?;

        let alerts_deduplicated =
            IntCounter::new("dao_monitor_alerts_deduplicated_total", "Raises collapsed into an existing alert")?;
        registry.register(Box::new(alerts_deduplicated.clone()))?;

        let alerts_resolved = IntCounter::new("dao_monitor_alerts_resolved_total", "Alerts resolved")?;
        registry.register(Box::new(alerts_resolved.clone()))?;

        let alerts_pruned = IntCounter::new("dao_monitor_alerts_pruned_total", "Alerts removed by retention")?;
        registry.register(Box::new(alerts_pruned.clone()))?;

        let dispatch_failures = IntCounterVec::new(
            Opts::new("dao_monitor_dispatch_failures_total", "Failed channel deliveries"),
            &["channel"],
        )?;
        registry.register(Box::new(dispatch_failures.clone()))?;

        let task_runs = IntCounterVec::new(
            Opts::new("dao_monitor_task_runs_total", "Scheduled task executions"),
            &["task"],
        )?;
        registry.register(Box::new(task_runs.clone()))?;

        let task_failures = IntCounterVec::new(
            Opts::new("dao_monitor_task_failures_total", "Scheduled task executions that failed"),
            &["task"],
        )?;
        registry.register(Box::new(task_failures.clone()))?;

        let ticks_skipped = IntCounterVec::new(
            Opts::new("dao_monitor_ticks_skipped_total", "Ticks skipped because the previous run was still in flight"),
            &["task"],
        )?;
        registry.register(Box::new(ticks_skipped.clone()))?;

        let task_duration = Histogram::with_opts(
            HistogramOpts::new("dao_monitor_task_duration_seconds", "Scheduled task duration")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(task_duration.clone()))?;

        Ok(Self {
            samples_collected,
            collection_failures,
            samples_pruned,
            series_length,
            alerts_raised,
            alerts_deduplicated,
            alerts_resolved,
            alerts_pruned,
            dispatch_failures,
            task_runs,
            task_failures,
            ticks_skipped,
            task_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        // Two engines must not collide on registration
        assert!(EngineMetrics::new().is_ok());
        assert!(EngineMetrics::new().is_ok());
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = EngineMetrics::new().unwrap();

        metrics.record_sample(MetricCategory::User, 2);
        metrics.record_sample(MetricCategory::Performance, 0);
        metrics.record_collection_failure(MetricCategory::Transaction);
        metrics.record_alert_raised("threshold_breach");
        metrics.record_alert_deduplicated();
        metrics.record_dispatch_failure("webhook");
        metrics.record_task_run("collect_user", Duration::from_millis(20), false);
        metrics.record_task_run("collect_user", Duration::from_millis(40), true);
        metrics.record_ticks_skipped("collect_user", 3);

        let stats = metrics.stats();
        assert_eq!(stats.samples_collected, 2);
        assert_eq!(stats.samples_pruned, 2);
        assert_eq!(stats.collection_failures, 1);
        assert_eq!(stats.alerts_raised, 1);
        assert_eq!(stats.alerts_deduplicated, 1);
        assert_eq!(stats.dispatch_failures, 1);
        assert_eq!(stats.task_runs, 2);
        assert_eq!(stats.task_failures, 1);
        assert_eq!(stats.ticks_skipped, 3);
        assert!(stats.avg_task_duration_ms > 0.0);
        assert_eq!(metrics.task_runs("collect_user"), 2);
    }

    #[test]
    fn test_metrics_export() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_sample(MetricCategory::Feedback, 0);
        metrics.set_series_length(MetricCategory::Feedback, 1);

        let output = metrics.export("prometheus").unwrap();
        assert!(output.contains("dao_monitor_samples_collected_total"));
        assert!(output.contains("category=\"feedback\""));

        let output = metrics.export("json").unwrap();
        assert!(output.contains("samples_collected"));

        assert!(metrics.export("xml").is_err());
    }
}
