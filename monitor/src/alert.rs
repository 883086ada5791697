//! Alert types, candidate alerts and alert filters

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdBreach,
    AnomalyDetected,
    ErrorSpike,
    PerformanceDegradation,
    /// The engine itself could not do its job (skipped collection, disabled task)
    Operational,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ThresholdBreach => "threshold_breach",
            AlertType::AnomalyDetected => "anomaly_detected",
            AlertType::ErrorSpike => "error_spike",
            AlertType::PerformanceDegradation => "performance_degradation",
            AlertType::Operational => "operational",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert proposed by an evaluator, before dedup and persistence
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Metric path, or the subsystem name for operational alerts
    pub metric: String,
    pub title: String,
    pub description: String,
    pub source_metrics: BTreeMap<String, f64>,
}

impl CandidateAlert {
    pub fn new(alert_type: AlertType, severity: AlertSeverity, metric: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            metric: metric.into(),
            title: title.into(),
            description: String::new(),
            source_metrics: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.source_metrics.insert(key.into(), value);
        self
    }

    /// Deterministic key over `{type, metric, severity}`
    pub fn dedup_key(&self) -> String {
        dedup_key(self.alert_type, &self.metric, self.severity)
    }
}

pub(crate) fn dedup_key(alert_type: AlertType, metric: &str, severity: AlertSeverity) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(alert_type.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(metric.as_bytes());
    hasher.update(&[0]);
    hasher.update(severity.as_str().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub metric: String,
    pub title: String,
    pub description: String,
    pub source_metrics: BTreeMap<String, f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub dedup_key: String,
}

impl Alert {
    pub fn from_candidate(candidate: CandidateAlert, timestamp: DateTime<Utc>) -> Self {
        let dedup_key = candidate.dedup_key();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            alert_type: candidate.alert_type,
            severity: candidate.severity,
            metric: candidate.metric,
            title: candidate.title,
            description: candidate.description,
            source_metrics: candidate.source_metrics,
            resolved: false,
            resolved_at: None,
            dedup_key,
        }
    }
}

/// Filter for alert queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub min_severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub resolved: Option<bool>,
}

impl AlertFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_min_severity(mut self, severity: AlertSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn with_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.severity.map_or(true, |s| alert.severity == s)
            && self.min_severity.map_or(true, |s| alert.severity >= s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.since.map_or(true, |since| alert.timestamp >= since)
            && self.until.map_or(true, |until| alert.timestamp <= until)
            && self.resolved.map_or(true, |resolved| alert.resolved == resolved)
    }
}
