//! Alert lifecycle: dedup, persistence, dispatch, resolution and pruning
//!
//! The alert log sits behind a single lock held only for in-memory work.
//! Channel dispatch happens after the lock is released so a slow channel
//! never blocks raises, resolves or queries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertFilter, CandidateAlert};
use crate::channels::AlertChannel;
use crate::config::AlertingConfig;
use crate::error::{DispatchError, MonitorError, Result};
use crate::metrics::EngineMetrics;
use crate::oplog::{OperationalEventKind, OperationalLog};
use crate::storage::Persistence;
use crate::store::window_to_chrono;

/// Result of [`AlertManager::raise`]
#[derive(Debug, Clone)]
pub struct Raised {
    pub alert: Alert,
    /// `false` when an equivalent alert inside the dedup window was returned
    pub is_new: bool,
}

/// Per-channel delivery outcome of one dispatch
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<DispatchError>,
}

struct AlertLog {
    alerts: VecDeque<Alert>,
    sealed: bool,
}

pub struct AlertManager {
    log: RwLock<AlertLog>,
    channels: Vec<Arc<dyn AlertChannel>>,
    dedup_window: chrono::Duration,
    dispatch_timeout: Duration,
    max_alerts: usize,
    metrics: Arc<EngineMetrics>,
    oplog: Arc<OperationalLog>,
    journal: Option<Arc<Persistence>>,
}

impl AlertManager {
    pub fn new(
        config: &AlertingConfig,
        channels: Vec<Arc<dyn AlertChannel>>,
        metrics: Arc<EngineMetrics>,
        oplog: Arc<OperationalLog>,
        journal: Option<Arc<Persistence>>,
    ) -> Result<Self> {
        Ok(Self {
            log: RwLock::new(AlertLog {
                alerts: VecDeque::new(),
                sealed: false,
            }),
            channels,
            dedup_window: window_to_chrono("alerting", config.dedup_window())?,
            dispatch_timeout: config.dispatch_timeout(),
            max_alerts: config.max_alerts.max(1),
            metrics,
            oplog,
            journal,
        })
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|channel| channel.name().to_string()).collect()
    }

    pub async fn raise(&self, candidate: CandidateAlert) -> Result<Raised> {
        self.raise_at(candidate, Utc::now()).await
    }

    /// Raise a candidate as of `now`.
    ///
    /// An unresolved alert with the same dedup key raised less than the
    /// dedup window ago is returned unchanged and nothing is dispatched.
    pub async fn raise_at(&self, candidate: CandidateAlert, now: DateTime<Utc>) -> Result<Raised> {
        let dedup_key = candidate.dedup_key();

        let alert = {
            let mut log = self.log.write().await;
            if log.sealed {
                return Err(MonitorError::Sealed("alert log".to_string()));
            }

            let duplicate = log.alerts.iter().rev().find(|existing| {
                !existing.resolved
                    && existing.dedup_key == dedup_key
                    && now.signed_duration_since(existing.timestamp) < self.dedup_window
            });
            if let Some(existing) = duplicate {
                debug!(alert_id = %existing.id, metric = %existing.metric, "Deduplicated alert");
                self.metrics.record_alert_deduplicated();
                return Ok(Raised {
                    alert: existing.clone(),
                    is_new: false,
                });
            }

            let alert = Alert::from_candidate(candidate, now);
            log.alerts.push_back(alert.clone());
            while log.alerts.len() > self.max_alerts {
                if let Some(evicted) = log.alerts.pop_front() {
                    debug!(alert_id = %evicted.id, "Evicted oldest alert at capacity");
                }
            }
            self.journal(&alert);
            alert
        };

        self.metrics.record_alert_raised(alert.alert_type.as_str());
        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            metric = %alert.metric,
            "Raised alert: {}", alert.title
        );

        self.dispatch(&alert).await;
        Ok(Raised { alert, is_new: true })
    }

    /// Send to every accepting channel concurrently.
    ///
    /// Each channel is bounded by the dispatch timeout. Failures are logged
    /// and recorded; they never affect other channels or the stored alert.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchReport {
        let mut report = DispatchReport::default();

        let targets: Vec<&Arc<dyn AlertChannel>> = self
            .channels
            .iter()
            .filter(|channel| {
                let accepted = channel.accepts(alert);
                if !accepted {
                    report.skipped.push(channel.name().to_string());
                }
                accepted
            })
            .collect();

        let sends = targets.iter().map(|channel| async move {
            let name = channel.name().to_string();
            let result = match tokio::time::timeout(self.dispatch_timeout, channel.send(alert)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout {
                    channel: name.clone(),
                    seconds: self.dispatch_timeout.as_secs(),
                }),
            };
            (name, result)
        });

        for (name, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    warn!(alert_id = %alert.id, channel = %name, "Alert dispatch failed: {}", e);
                    self.metrics.record_dispatch_failure(&name);
                    self.oplog.record(
                        OperationalEventKind::DispatchFailed,
                        name,
                        format!("alert {}: {}", alert.id, e),
                    );
                    report.failures.push(e);
                }
            }
        }

        report
    }

    /// Mark an alert resolved. Unknown or already resolved ids are a no-op.
    pub async fn resolve(&self, id: &str) -> Result<Option<Alert>> {
        let mut log = self.log.write().await;
        if log.sealed {
            return Err(MonitorError::Sealed("alert log".to_string()));
        }

        let Some(alert) = log.alerts.iter_mut().find(|alert| alert.id == id) else {
            debug!(alert_id = %id, "Resolve of unknown alert ignored");
            return Ok(None);
        };
        if alert.resolved {
            return Ok(None);
        }

        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        let resolved = alert.clone();
        self.journal(&resolved);
        self.metrics.record_alert_resolved();
        info!(alert_id = %id, "Resolved alert");
        Ok(Some(resolved))
    }

    /// Snapshot of the alerts matching `filter`, oldest first
    pub async fn query(&self, filter: &AlertFilter) -> Vec<Alert> {
        let log = self.log.read().await;
        log.alerts.iter().filter(|alert| filter.matches(alert)).cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Alert> {
        let log = self.log.read().await;
        log.alerts.iter().find(|alert| alert.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.alerts.len()
    }

    /// Remove alerts older than `window`.
    ///
    /// Unresolved alerts are pruned too unless `prune_unresolved` is false.
    pub async fn prune(&self, window: Duration, prune_unresolved: bool, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - window_to_chrono("retention", window)?;

        let mut log = self.log.write().await;
        if log.sealed {
            return Ok(0);
        }

        let before = log.alerts.len();
        log.alerts.retain(|alert| {
            if alert.timestamp >= cutoff {
                return true;
            }
            if !alert.resolved {
                if !prune_unresolved {
                    return true;
                }
                warn!(
                    alert_id = %alert.id,
                    severity = %alert.severity,
                    "Pruning unresolved alert past retention: {}", alert.title
                );
            }
            false
        });
        let pruned = before - log.alerts.len();

        if pruned > 0 {
            self.metrics.record_alerts_pruned(pruned);
        }
        Ok(pruned)
    }

    pub async fn seal(&self) {
        self.log.write().await.sealed = true;
    }

    pub async fn unseal(&self) {
        self.log.write().await.sealed = false;
    }

    /// Every alert, for the shutdown snapshot
    pub async fn snapshot(&self) -> Vec<Alert> {
        self.log.read().await.alerts.iter().cloned().collect()
    }

    pub async fn restore(&self, mut alerts: Vec<Alert>) {
        alerts.sort_by_key(|alert| alert.timestamp);
        let skip = alerts.len().saturating_sub(self.max_alerts);

        let mut log = self.log.write().await;
        log.alerts = alerts.into_iter().skip(skip).collect();
    }

    fn journal(&self, alert: &Alert) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append_alert(alert) {
                warn!(alert_id = %alert.id, "Failed to journal alert: {}", e);
                self.oplog
                    .record(OperationalEventKind::PersistenceFailed, "alerts", e.to_string());
            }
        }
    }
}
