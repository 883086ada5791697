//! Engine state shared by every scheduled task

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::aggregation::Aggregator;
use crate::alert::CandidateAlert;
use crate::alert_manager::AlertManager;
use crate::anomaly::AnomalyDetector;
use crate::channels::{self, AlertChannel};
use crate::config::MonitorConfig;
use crate::data_source::ChainDataSource;
use crate::error::{MonitorError, Result};
use crate::metrics::EngineMetrics;
use crate::oplog::OperationalLog;
use crate::sample::MetricCategory;
use crate::storage::Persistence;
use crate::store::MetricStore;
use crate::threshold::ThresholdEvaluator;

/// Everything the engine mutates, built once at initialization and handed
/// to each task explicitly.
pub struct EngineState {
    pub config: MonitorConfig,
    pub store: MetricStore,
    pub thresholds: ThresholdEvaluator,
    pub anomaly: Mutex<AnomalyDetector>,
    pub aggregator: Aggregator,
    pub alerts: AlertManager,
    pub source: Arc<dyn ChainDataSource>,
    pub metrics: Arc<EngineMetrics>,
    pub oplog: Arc<OperationalLog>,
    pub persistence: Option<Arc<Persistence>>,
}

impl EngineState {
    /// Validate `config` and build the state. Configured channels come
    /// first, followed by `extra_channels`.
    pub fn build(
        config: MonitorConfig,
        source: Arc<dyn ChainDataSource>,
        extra_channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new()?);
        let oplog = Arc::new(OperationalLog::new(config.metrics.operational_log_capacity));

        let persistence = if config.persistence.enabled {
            Some(Arc::new(Persistence::new(&config.persistence.directory)?))
        } else {
            None
        };

        let mut alert_channels = channels::from_config(&config.alerting.channels)?;
        alert_channels.extend(extra_channels);

        let alerts = AlertManager::new(
            &config.alerting,
            alert_channels,
            metrics.clone(),
            oplog.clone(),
            persistence.clone(),
        )?;

        Ok(Self {
            store: MetricStore::new(),
            thresholds: ThresholdEvaluator::new(&config.thresholds)?,
            anomaly: Mutex::new(AnomalyDetector::new(&config.anomaly)?),
            aggregator: Aggregator::new(config.aggregation.clone()),
            alerts,
            source,
            metrics,
            oplog,
            persistence,
            config,
        })
    }

    /// Reload persisted series and alerts, re-applying retention.
    ///
    /// Restored samples warm the anomaly windows without raising alerts.
    pub async fn restore(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let now = Utc::now();

        for category in MetricCategory::ALL {
            let samples = persistence.load_series(category)?;
            if samples.is_empty() {
                continue;
            }
            self.store.restore(category, samples).await?;
            let pruned = self
                .store
                .prune(category, self.config.retention.window(category), now)
                .await?;
            let len = self.store.len(category).await;
            self.metrics.set_series_length(category, len);
            debug!(%category, restored = len, pruned, "Restored series");
        }

        let alerts = persistence.load_alerts()?;
        let restored = alerts.len();
        self.alerts.restore(alerts).await;
        self.alerts
            .prune(
                self.config.retention.alerts(),
                self.config.retention.prune_unresolved_alerts,
                now,
            )
            .await?;

        let warmed = self.anomaly.lock().await.poll(&self.store).await;
        info!(
            alerts = restored,
            anomaly_samples = warmed.observed,
            "Restored state from {}",
            persistence.base_path().display()
        );
        Ok(())
    }

    /// Write the compacted snapshot of every series and the alert log
    pub async fn write_snapshot(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let mut series = Vec::with_capacity(MetricCategory::ALL.len());
        for category in MetricCategory::ALL {
            let snapshot = self.store.query(category, Default::default()).await;
            series.push((category, snapshot.iter().cloned().collect()));
        }
        let alerts = self.alerts.snapshot().await;

        persistence.write_snapshot(&series, &alerts)
    }

    /// Raise every candidate; a failing raise never stops the rest
    pub async fn raise_all(&self, candidates: Vec<CandidateAlert>) -> usize {
        let mut raised = 0;
        for candidate in candidates {
            match self.alerts.raise(candidate).await {
                Ok(outcome) if outcome.is_new => raised += 1,
                Ok(_) => {}
                Err(MonitorError::Sealed(_)) => {
                    debug!("Alert log sealed, dropping candidate");
                }
                Err(e) => warn!("Failed to raise alert: {}", e),
            }
        }
        raised
    }
}
