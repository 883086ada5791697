//! Configuration management for the DAO platform monitor
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files and environment variables. Validation happens once,
//! before the engine starts; nothing here is re-checked at runtime.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::AlertSeverity;
use crate::error::{ConfigError, ConfigResult};
use crate::sample::{MetricCategory, MetricPath};
use crate::threshold::{Comparator, ThresholdRule};

/// Longest retention window accepted, roughly ten years
const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Smallest window the anomaly detector may activate on
pub const MIN_ANOMALY_SAMPLES: usize = 10;

/// Main configuration structure for the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Upper bound on how long `stop()` waits for in-flight work
    pub shutdown_timeout_secs: u64,

    /// Cadence of every scheduled task
    pub intervals: IntervalsConfig,

    /// Retention windows for series and alerts
    pub retention: RetentionConfig,

    /// Static threshold rules
    pub thresholds: Vec<ThresholdRule>,

    /// Rolling z-score detection
    pub anomaly: AnomalyConfig,

    /// Alert dedup and dispatch
    pub alerting: AlertingConfig,

    /// Platform data source
    pub data_source: DataSourceConfig,

    /// Hourly/daily/weekly rollups
    pub aggregation: AggregationConfig,

    /// Optional on-disk durability
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Self-instrumentation
    pub metrics: MetricsConfig,
}

/// Scheduler cadences, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    /// User, transaction and feature adoption collection
    pub real_time_secs: u64,

    /// Feedback collection and hourly rollup
    pub hourly_secs: u64,

    /// Daily rollup
    pub daily_secs: u64,

    /// Weekly rollup
    pub weekly_secs: u64,

    /// Performance collection
    pub performance_secs: u64,

    /// Threshold and anomaly evaluation
    pub alerting_secs: u64,

    /// Retention cleanup
    pub retention_secs: u64,
}

/// Retention windows, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub user_secs: u64,
    pub transaction_secs: u64,
    pub feature_adoption_secs: u64,
    pub performance_secs: u64,
    pub feedback_secs: u64,

    /// Alert log retention
    pub alerts_secs: u64,

    /// Prune unresolved alerts by age like resolved ones
    pub prune_unresolved_alerts: bool,
}

/// Anomaly detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,

    /// Z-score above which a sample is anomalous
    pub z_score_threshold: f64,

    /// Ring buffer length per tracked metric
    pub window_size: usize,

    /// Prior observations required before detection activates; at least
    /// [`MIN_ANOMALY_SAMPLES`]
    pub min_samples: usize,

    /// Metric paths to track
    pub tracked_metrics: Vec<String>,
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Equivalent unresolved alerts collapse within this window
    pub dedup_window_secs: u64,

    /// Per-channel send timeout
    pub dispatch_timeout_secs: u64,

    /// Alerts kept in memory before the oldest are evicted
    pub max_alerts: usize,

    /// Configured channels
    pub channels: Vec<ChannelConfig>,
}

/// Alert channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Write alerts to the tracing log
    Log {
        #[serde(default = "default_min_severity")]
        min_severity: AlertSeverity,
    },

    /// POST alerts as JSON to a URL
    Webhook {
        url: String,
        #[serde(default = "default_min_severity")]
        min_severity: AlertSeverity,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

fn default_min_severity() -> AlertSeverity {
    AlertSeverity::Low
}

fn default_webhook_timeout() -> u64 {
    5
}

/// Platform data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Base URL of the platform metrics API
    pub base_url: Option<String>,

    /// Bound on every query, enforced by the collectors
    pub timeout_secs: u64,
}

/// Rollup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub enabled: bool,

    /// Rollups kept per period
    pub max_rollups: usize,

    /// Error rate growth between rollups that counts as a spike
    pub error_spike_ratio: f64,

    /// Error rates below this never count as a spike
    pub error_rate_floor: f64,

    /// Response time growth between rollups that counts as degradation
    pub degradation_ratio: f64,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,

    /// Directory for series and alert logs
    pub directory: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// `text` or `json`
    pub format: String,

    /// Optional log file, rotated daily
    pub file_path: Option<PathBuf>,

    /// Enable console logging
    pub console: bool,
}

/// Self-instrumentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// `prometheus` or `json`
    pub export_format: String,

    /// Operational events kept in memory
    pub operational_log_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
            intervals: IntervalsConfig::default(),
            retention: RetentionConfig::default(),
            thresholds: default_thresholds(),
            anomaly: AnomalyConfig::default(),
            alerting: AlertingConfig::default(),
            data_source: DataSourceConfig::default(),
            aggregation: AggregationConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_thresholds() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::new("performance.error_rate", Comparator::Gt, 5.0, AlertSeverity::High),
        ThresholdRule::new("performance.response_time_ms", Comparator::Gt, 2000.0, AlertSeverity::Medium),
        ThresholdRule::new("transaction.success_rate", Comparator::Lt, 95.0, AlertSeverity::High),
        ThresholdRule::new("performance.uptime", Comparator::Lt, 99.0, AlertSeverity::Critical),
        ThresholdRule::new("feedback.satisfaction_score", Comparator::Lt, 3.0, AlertSeverity::Low),
    ]
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            real_time_secs: 60,
            hourly_secs: 3600,
            daily_secs: 24 * 3600,
            weekly_secs: 7 * 24 * 3600,
            performance_secs: 300,
            alerting_secs: 60,
            retention_secs: 3600,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            user_secs: 7 * 24 * 3600,
            transaction_secs: 7 * 24 * 3600,
            feature_adoption_secs: 30 * 24 * 3600,
            performance_secs: 24 * 3600,
            feedback_secs: 90 * 24 * 3600,
            alerts_secs: 30 * 24 * 3600,
            prune_unresolved_alerts: true,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            z_score_threshold: 2.0,
            window_size: 100,
            min_samples: 10,
            tracked_metrics: vec![
                "user.active_users".to_string(),
                "transaction.total_transactions".to_string(),
                "transaction.average_gas_used".to_string(),
                "performance.response_time_ms".to_string(),
                "performance.error_rate".to_string(),
            ],
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            dispatch_timeout_secs: 10,
            max_alerts: 10_000,
            channels: vec![ChannelConfig::Log {
                min_severity: AlertSeverity::Low,
            }],
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rollups: 48,
            error_spike_ratio: 2.0,
            error_rate_floor: 1.0,
            degradation_ratio: 1.5,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let directory = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("dao-monitor");

        Self {
            enabled: false,
            directory,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file_path: None,
            console: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_format: "prometheus".to_string(),
            operational_log_capacity: 1000,
        }
    }
}

impl IntervalsConfig {
    pub fn real_time(&self) -> Duration {
        Duration::from_secs(self.real_time_secs)
    }

    pub fn hourly(&self) -> Duration {
        Duration::from_secs(self.hourly_secs)
    }

    pub fn daily(&self) -> Duration {
        Duration::from_secs(self.daily_secs)
    }

    pub fn weekly(&self) -> Duration {
        Duration::from_secs(self.weekly_secs)
    }

    pub fn performance(&self) -> Duration {
        Duration::from_secs(self.performance_secs)
    }

    pub fn alerting(&self) -> Duration {
        Duration::from_secs(self.alerting_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    fn entries(&self) -> [(&'static str, u64); 7] {
        [
            ("intervals.real_time_secs", self.real_time_secs),
            ("intervals.hourly_secs", self.hourly_secs),
            ("intervals.daily_secs", self.daily_secs),
            ("intervals.weekly_secs", self.weekly_secs),
            ("intervals.performance_secs", self.performance_secs),
            ("intervals.alerting_secs", self.alerting_secs),
            ("intervals.retention_secs", self.retention_secs),
        ]
    }
}

impl RetentionConfig {
    /// Retention window of one category
    pub fn window(&self, category: MetricCategory) -> Duration {
        let secs = match category {
            MetricCategory::User => self.user_secs,
            MetricCategory::Transaction => self.transaction_secs,
            MetricCategory::FeatureAdoption => self.feature_adoption_secs,
            MetricCategory::Performance => self.performance_secs,
            MetricCategory::Feedback => self.feedback_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn alerts(&self) -> Duration {
        Duration::from_secs(self.alerts_secs)
    }
}

impl AlertingConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: MonitorConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults plus environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: file -> defaults, then env overrides
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) if path.as_ref().exists() => MonitorConfig::from_file(path)?,
            _ => MonitorConfig::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected values from `DAO_MONITOR_*` environment variables
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(url) = std::env::var("DAO_MONITOR_DATA_SOURCE_URL") {
            self.data_source.base_url = Some(url);
        }

        if let Ok(level) = std::env::var("DAO_MONITOR_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(directory) = std::env::var("DAO_MONITOR_PERSISTENCE_DIR") {
            self.persistence.enabled = true;
            self.persistence.directory = PathBuf::from(directory);
        }

        if let Ok(z_score) = std::env::var("DAO_MONITOR_ANOMALY_Z_SCORE") {
            self.anomaly.z_score_threshold = z_score.parse().map_err(|_| ConfigError::InvalidValue {
                field: "DAO_MONITOR_ANOMALY_Z_SCORE".to_string(),
                value: z_score,
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, seconds) in self.intervals.entries() {
            if seconds < 1 {
                return Err(ConfigError::IntervalTooShort {
                    field: field.to_string(),
                    seconds,
                });
            }
        }

        for category in MetricCategory::ALL {
            let window = self.retention.window(category).as_secs();
            if window > MAX_RETENTION_SECS {
                return Err(ConfigError::InvalidValue {
                    field: format!("retention.{}_secs", category),
                    value: window.to_string(),
                });
            }
        }
        if self.retention.alerts_secs > MAX_RETENTION_SECS {
            return Err(ConfigError::InvalidValue {
                field: "retention.alerts_secs".to_string(),
                value: self.retention.alerts_secs.to_string(),
            });
        }

        for rule in &self.thresholds {
            MetricPath::parse(&rule.metric)?;
            if !rule.limit.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: format!("thresholds[{}].limit", rule.metric),
                    value: rule.limit.to_string(),
                });
            }
        }

        self.validate_anomaly()?;

        if self.alerting.dedup_window_secs > MAX_RETENTION_SECS {
            return Err(ConfigError::InvalidValue {
                field: "alerting.dedup_window_secs".to_string(),
                value: self.alerting.dedup_window_secs.to_string(),
            });
        }
        if self.alerting.dispatch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "alerting.dispatch_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.alerting.max_alerts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "alerting.max_alerts".to_string(),
                value: "0".to_string(),
            });
        }
        for channel in &self.alerting.channels {
            if let ChannelConfig::Webhook { url, timeout_secs, .. } = channel {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        field: "alerting.channels.url".to_string(),
                        value: url.clone(),
                    });
                }
                if *timeout_secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "alerting.channels.timeout_secs".to_string(),
                        value: "0".to_string(),
                    });
                }
            }
        }

        if self.data_source.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "data_source.timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        if self.aggregation.max_rollups == 0 {
            return Err(ConfigError::InvalidValue {
                field: "aggregation.max_rollups".to_string(),
                value: "0".to_string(),
            });
        }
        for (field, ratio) in [
            ("aggregation.error_spike_ratio", self.aggregation.error_spike_ratio),
            ("aggregation.degradation_ratio", self.aggregation.degradation_ratio),
        ] {
            if !ratio.is_finite() || ratio <= 1.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: ratio.to_string(),
                });
            }
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "shutdown_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        if self.metrics.operational_log_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.operational_log_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    fn validate_anomaly(&self) -> ConfigResult<()> {
        let anomaly = &self.anomaly;
        if !(anomaly.z_score_threshold.is_finite() && anomaly.z_score_threshold > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "anomaly.z_score_threshold".to_string(),
                value: anomaly.z_score_threshold.to_string(),
            });
        }
        if anomaly.min_samples < MIN_ANOMALY_SAMPLES {
            return Err(ConfigError::InvalidValue {
                field: "anomaly.min_samples".to_string(),
                value: anomaly.min_samples.to_string(),
            });
        }
        if anomaly.window_size <= anomaly.min_samples {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "anomaly.window_size ({}) must exceed anomaly.min_samples ({})",
                    anomaly.window_size, anomaly.min_samples
                ),
            });
        }
        for metric in &anomaly.tracked_metrics {
            MetricPath::parse(metric)?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("dao-monitor").join("monitor.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}
