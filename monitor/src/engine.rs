//! The monitoring engine: lifecycle and query surface
//!
//! `initialize` validates configuration and builds the [`EngineState`].
//! `start` registers one task per cadence; `stop` drains them, seals the
//! store and alert log, and writes the final snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::aggregation::{RollupPeriod, UsageRollup};
use crate::alert::{Alert, AlertFilter};
use crate::channels::AlertChannel;
use crate::collectors;
use crate::config::MonitorConfig;
use crate::data_source::{ChainDataSource, HttpDataSource};
use crate::error::{ConfigError, Result};
use crate::oplog::{OperationalEvent, OperationalEventKind};
use crate::retention;
use crate::sample::MetricCategory;
use crate::scheduler::{Scheduler, ShutdownReport, TaskSnapshot};
use crate::state::EngineState;
use crate::store::{SeriesSnapshot, TimeRange};

/// Engine summary for status output
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub series_lengths: BTreeMap<MetricCategory, usize>,
    pub alerts: usize,
    pub unresolved_alerts: usize,
    pub tasks: Vec<TaskSnapshot>,
}

pub struct MonitoringEngine {
    state: Arc<EngineState>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl MonitoringEngine {
    /// Validate `config`, build the engine state and restore persisted data.
    ///
    /// Only configuration errors surface here; nothing runs until `start`.
    pub async fn initialize(
        config: MonitorConfig,
        source: Arc<dyn ChainDataSource>,
        extra_channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Result<Self> {
        let state = EngineState::build(config, source, extra_channels)?;
        state.restore().await?;

        info!(
            thresholds = state.thresholds.rule_count(),
            channels = state.alerts.channel_names().len(),
            persistence = state.persistence.is_some(),
            "Monitoring engine initialized"
        );

        Ok(Self {
            state: Arc::new(state),
            scheduler: Mutex::new(None),
        })
    }

    /// Initialize against the HTTP platform endpoint in `data_source.base_url`
    pub async fn initialize_http(config: MonitorConfig) -> Result<Self> {
        let source = HttpDataSource::from_config(&config.data_source)?.ok_or_else(|| ConfigError::InvalidValue {
            field: "data_source.base_url".to_string(),
            value: "<unset>".to_string(),
        })?;
        Self::initialize(config, Arc::new(source), Vec::new()).await
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.state.config
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Start every scheduled task. Returns `false` if already running.
    pub async fn start(&self) -> Result<bool> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Ok(false);
        }

        self.state.store.unseal().await;
        self.state.alerts.unseal().await;

        let mut scheduler = Scheduler::new(self.state.metrics.clone(), self.state.oplog.clone());
        if let Err(e) = self.register_tasks(&mut scheduler) {
            scheduler.cancel_all(self.state.config.shutdown_timeout()).await;
            return Err(e);
        }

        info!(tasks = ?scheduler.task_names(), "Monitoring engine started");
        *slot = Some(scheduler);
        Ok(true)
    }

    fn register_tasks(&self, scheduler: &mut Scheduler) -> Result<()> {
        let intervals = &self.state.config.intervals;

        let collection = [
            (MetricCategory::User, intervals.real_time()),
            (MetricCategory::Transaction, intervals.real_time()),
            (MetricCategory::FeatureAdoption, intervals.real_time()),
            (MetricCategory::Performance, intervals.performance()),
            (MetricCategory::Feedback, intervals.hourly()),
        ];
        for (category, interval) in collection {
            let state = self.state.clone();
            scheduler.schedule(format!("collect_{}", category), interval, move || {
                let state = state.clone();
                async move { collectors::collect(&state, category).await.map(|_| ()) }
            })?;
        }

        let state = self.state.clone();
        scheduler.schedule("thresholds", intervals.alerting(), move || {
            let state = state.clone();
            async move {
                let candidates = state.thresholds.evaluate(&state.store).await;
                state.raise_all(candidates).await;
                Ok(())
            }
        })?;

        if self.state.config.anomaly.enabled {
            let state = self.state.clone();
            scheduler.schedule("anomaly", intervals.alerting(), move || {
                let state = state.clone();
                async move {
                    let pass = state.anomaly.lock().await.poll(&state.store).await;
                    if pass.missed > 0 {
                        state.oplog.record(
                            OperationalEventKind::SamplesMissed,
                            "anomaly",
                            format!("{} samples pruned before detection", pass.missed),
                        );
                    }
                    state.raise_all(pass.candidates).await;
                    Ok(())
                }
            })?;
        }

        if self.state.config.aggregation.enabled {
            let rollups = [
                (RollupPeriod::Hourly, intervals.hourly()),
                (RollupPeriod::Daily, intervals.daily()),
                (RollupPeriod::Weekly, intervals.weekly()),
            ];
            for (period, interval) in rollups {
                let state = self.state.clone();
                scheduler.schedule(format!("rollup_{}", period), interval, move || {
                    let state = state.clone();
                    async move {
                        let candidates = state.aggregator.run(&state.store, period, Utc::now()).await;
                        state.raise_all(candidates).await;
                        Ok(())
                    }
                })?;
            }
        }

        let state = self.state.clone();
        scheduler.schedule("retention", intervals.retention(), move || {
            let state = state.clone();
            async move { retention::run_retention(&state).await.map(|_| ()) }
        })?;

        Ok(())
    }

    /// Drain running tasks, seal writes and persist the final snapshot.
    ///
    /// Returns `None` if the engine was not running. Once this returns, no
    /// sample or alert mutation can land, even from abandoned tasks.
    pub async fn stop(&self) -> Result<Option<ShutdownReport>> {
        let mut slot = self.scheduler.lock().await;
        let Some(mut scheduler) = slot.take() else {
            return Ok(None);
        };

        let report = scheduler.cancel_all(self.state.config.shutdown_timeout()).await;
        if !report.is_clean() {
            warn!(abandoned = ?report.abandoned, "Shutdown timeout elapsed with tasks in flight");
        }

        self.state.store.seal().await;
        self.state.alerts.seal().await;

        if let Err(e) = self.state.write_snapshot().await {
            error!("Failed to write final snapshot: {}", e);
            self.state
                .oplog
                .record(OperationalEventKind::PersistenceFailed, "snapshot", e.to_string());
            return Err(e);
        }

        info!(completed = report.completed.len(), abandoned = report.abandoned.len(), "Monitoring engine stopped");
        Ok(Some(report))
    }

    /// Restartable snapshot of one series within `range`
    pub async fn query_series(&self, category: MetricCategory, range: TimeRange) -> SeriesSnapshot {
        self.state.store.query(category, range).await
    }

    pub async fn query_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.state.alerts.query(filter).await
    }

    /// Resolve an alert; unknown or already resolved ids are a no-op
    pub async fn resolve_alert(&self, id: &str) -> Result<Option<Alert>> {
        self.state.alerts.resolve(id).await
    }

    pub async fn latest_rollup(&self, period: RollupPeriod) -> Option<UsageRollup> {
        self.state.aggregator.latest(period).await
    }

    pub async fn rollups(&self, period: RollupPeriod) -> Vec<UsageRollup> {
        self.state.aggregator.rollups(period).await
    }

    pub fn operational_events(&self) -> Vec<OperationalEvent> {
        self.state.oplog.events()
    }

    pub fn export_metrics(&self, format: &str) -> Result<String> {
        self.state.metrics.export(format)
    }

    pub async fn status(&self) -> EngineStatus {
        let (running, tasks) = {
            let slot = self.scheduler.lock().await;
            (slot.is_some(), slot.as_ref().map(Scheduler::snapshot).unwrap_or_default())
        };

        let mut series_lengths = BTreeMap::new();
        for category in MetricCategory::ALL {
            series_lengths.insert(category, self.state.store.len(category).await);
        }

        EngineStatus {
            running,
            series_lengths,
            alerts: self.state.alerts.len().await,
            unresolved_alerts: self.state.alerts.query(&AlertFilter::unresolved()).await.len(),
            tasks,
        }
    }
}
