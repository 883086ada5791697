//! Per-category collectors
//!
//! A collection cycle queries the data source once, appends exactly one
//! sample and applies the category's retention window. A failed or timed
//! out query appends nothing and surfaces as a low-severity operational
//! alert.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::alert::{AlertSeverity, AlertType, CandidateAlert};
use crate::error::{DataSourceError, Result};
use crate::oplog::OperationalEventKind;
use crate::sample::{MetricCategory, MetricSample};
use crate::state::EngineState;
use crate::store::AppendOutcome;

/// What one collection cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    Appended { pruned: usize },
    /// The store was sealed for shutdown; the queried values were dropped
    Sealed,
    /// The data source failed; nothing was recorded for this cycle
    Skipped(String),
}

pub async fn collect(state: &EngineState, category: MetricCategory) -> Result<CollectionOutcome> {
    collect_at(state, category, None).await
}

/// Run one collection cycle. `now` overrides the sample timestamp.
pub async fn collect_at(
    state: &EngineState,
    category: MetricCategory,
    now: Option<DateTime<Utc>>,
) -> Result<CollectionOutcome> {
    let timeout = Duration::from_secs(state.config.data_source.timeout_secs);

    let fields = match tokio::time::timeout(timeout, state.source.query(category)).await {
        Ok(Ok(fields)) => fields,
        Ok(Err(e)) => return Ok(skip_cycle(state, category, e).await),
        Err(_) => {
            let e = DataSourceError::Timeout {
                category,
                seconds: timeout.as_secs(),
            };
            return Ok(skip_cycle(state, category, e).await);
        }
    };

    let mut timestamp = now.unwrap_or_else(Utc::now);
    if let Some(head) = state.store.latest(category).await {
        if timestamp < head.timestamp {
            warn!(%category, %timestamp, head = %head.timestamp, "Clock moved backwards, clamping sample timestamp");
            timestamp = head.timestamp;
        }
    }

    let sample = MetricSample::new(category, timestamp, fields);
    let window = state.config.retention.window(category);

    let outcome = state
        .store
        .append_with(sample, window, timestamp, |appended| journal(state, appended))
        .await?;

    match outcome {
        AppendOutcome::Appended { pruned } => {
            state.metrics.record_sample(category, pruned);
            state.metrics.set_series_length(category, state.store.len(category).await);
            debug!(%category, pruned, "Collected sample");
            Ok(CollectionOutcome::Appended { pruned })
        }
        AppendOutcome::Sealed => {
            debug!(%category, "Store sealed, dropping collected sample");
            Ok(CollectionOutcome::Sealed)
        }
    }
}

async fn skip_cycle(state: &EngineState, category: MetricCategory, error: DataSourceError) -> CollectionOutcome {
    warn!(%category, "Skipping collection cycle: {}", error);
    state.metrics.record_collection_failure(category);
    state
        .oplog
        .record(OperationalEventKind::CollectionSkipped, category.as_str(), error.to_string());

    let candidate = CandidateAlert::new(
        AlertType::Operational,
        AlertSeverity::Low,
        format!("collector.{}", category),
        format!("{} collection skipped", category),
    )
    .with_description(error.to_string());
    state.raise_all(vec![candidate]).await;

    CollectionOutcome::Skipped(error.to_string())
}

/// Runs under the series write lock, so a sealed store never journals
fn journal(state: &EngineState, sample: &MetricSample) {
    if let Some(persistence) = &state.persistence {
        if let Err(e) = persistence.append_sample(sample) {
            warn!(category = %sample.category, "Failed to journal sample: {}", e);
            state
                .oplog
                .record(OperationalEventKind::PersistenceFailed, sample.category.as_str(), e.to_string());
        }
    }
}
