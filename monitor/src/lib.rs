//! DAO platform usage monitor library
//!
//! This library provides the monitoring engine for the DAO platform: it
//! polls the platform for usage samples on several cadences, keeps bounded
//! time series per metric category, builds hourly/daily/weekly rollups and
//! raises threshold, anomaly and trend alerts through pluggable channels.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod oplog;
pub mod storage;

// Data model and series
pub mod sample;
pub mod store;

// Detection and alerting
pub mod aggregation;
pub mod alert;
pub mod alert_manager;
pub mod anomaly;
pub mod channels;
pub mod threshold;

// Runtime
pub mod collectors;
pub mod data_source;
pub mod engine;
pub mod retention;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use aggregation::{Aggregator, FieldSummary, RollupPeriod, UsageRollup};
pub use alert::{Alert, AlertFilter, AlertSeverity, AlertType, CandidateAlert};
pub use alert_manager::AlertManager;
pub use anomaly::{AnomalyDetector, AnomalyWindow};
pub use channels::{AlertChannel, LogChannel, WebhookChannel};
pub use config::MonitorConfig;
pub use data_source::{ChainDataSource, HttpDataSource};
pub use engine::{EngineStatus, MonitoringEngine};
pub use error::{ConfigError, DataSourceError, DispatchError, MonitorError, Result};
pub use metrics::EngineMetrics;
pub use oplog::{OperationalEvent, OperationalEventKind, OperationalLog};
pub use sample::{MetricCategory, MetricPath, MetricSample};
pub use scheduler::{Scheduler, ShutdownReport};
pub use state::EngineState;
pub use store::{MetricStore, SeriesSnapshot, TimeRange};
pub use threshold::{Comparator, ThresholdEvaluator, ThresholdRule};
