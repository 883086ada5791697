//! Periodic pruning of series and alerts

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::sample::MetricCategory;
use crate::state::EngineState;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    pub samples_pruned: BTreeMap<MetricCategory, usize>,
    pub alerts_pruned: usize,
}

impl RetentionReport {
    pub fn total_samples(&self) -> usize {
        self.samples_pruned.values().sum()
    }
}

pub async fn run_retention(state: &EngineState) -> Result<RetentionReport> {
    run_retention_at(state, Utc::now()).await
}

/// Prune every series to its window and the alert log to the alert window.
/// The newest sample of each series always survives.
pub async fn run_retention_at(state: &EngineState, now: DateTime<Utc>) -> Result<RetentionReport> {
    let retention = &state.config.retention;
    let mut report = RetentionReport::default();

    for category in MetricCategory::ALL {
        let pruned = state.store.prune(category, retention.window(category), now).await?;
        state.metrics.record_pruned(category, pruned);
        state.metrics.set_series_length(category, state.store.len(category).await);
        report.samples_pruned.insert(category, pruned);
    }

    report.alerts_pruned = state
        .alerts
        .prune(retention.alerts(), retention.prune_unresolved_alerts, now)
        .await?;

    if report.total_samples() > 0 || report.alerts_pruned > 0 {
        info!(
            samples = report.total_samples(),
            alerts = report.alerts_pruned,
            "Retention pass complete"
        );
    }
    Ok(report)
}
