//! Error handling for the DAO platform monitor
//!
//! This module provides the error taxonomy for the engine: configuration
//! errors (fatal, only at initialization), data source errors (transient,
//! skip a collection cycle), dispatch errors (transient, per channel) and
//! internal invariant violations (disable the affected subsystem).

use std::io;

use thiserror::Error;

use crate::sample::MetricCategory;

/// The main error type for the monitoring engine
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Chain data source errors
    #[error("Data source error: {0}")]
    DataSource(#[from] DataSourceError),

    /// Alert channel dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// An internal invariant no longer holds; the named subsystem is disabled
    #[error("Invariant violation in {subsystem}: {reason}")]
    InvariantViolation { subsystem: String, reason: String },

    /// The store or alert log no longer accepts writes
    #[error("{0} is sealed for shutdown")]
    Sealed(String),

    /// Journal and snapshot errors
    #[error("Persistence error at {path}: {reason}")]
    Persistence { path: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduling errors
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Self-instrumentation errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Interval {field} is {seconds}s; the minimum cadence is 1s")]
    IntervalTooShort { field: String, seconds: u64 },

    #[error("Unknown metric path: {path}")]
    UnknownMetricPath { path: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },
}

/// Errors reported by a `ChainDataSource`
#[derive(Error, Debug, Clone)]
pub enum DataSourceError {
    #[error("{category} metrics unavailable: {reason}")]
    DataUnavailable { category: MetricCategory, reason: String },

    #[error("{category} metrics query timed out after {seconds}s")]
    Timeout { category: MetricCategory, seconds: u64 },
}

/// Errors reported by an `AlertChannel`
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("Channel {channel} failed: {reason}")]
    ChannelFailed { channel: String, reason: String },

    #[error("Channel {channel} timed out after {seconds}s")]
    Timeout { channel: String, seconds: u64 },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for data source queries
pub type DataSourceResult<T> = std::result::Result<T, DataSourceError>;

/// A specialized result type for alert dispatch
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

impl MonitorError {
    pub fn invariant(subsystem: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::InvariantViolation {
            subsystem: subsystem.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        MonitorError::Persistence {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is recoverable by simply waiting for the next cycle
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Config(_) => false,
            MonitorError::InvariantViolation { .. } => false,
            MonitorError::Sealed(_) => false,
            MonitorError::DataSource(_) => true,
            MonitorError::Dispatch(_) => true,
            MonitorError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => true,
        }
    }

    /// Check if this error requires immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(self, MonitorError::InvariantViolation { .. })
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::DataSource(_) => "data_source",
            MonitorError::Dispatch(_) => "dispatch",
            MonitorError::InvariantViolation { .. } => "invariant",
            MonitorError::Sealed(_) => "sealed",
            MonitorError::Persistence { .. } => "persistence",
            MonitorError::Io(_) => "io",
            MonitorError::Serialization(_) => "serialization",
            MonitorError::Scheduling(_) => "scheduling",
            MonitorError::Metrics(_) => "metrics",
            MonitorError::Generic(_) => "generic",
        }
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::Generic(msg)
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::Generic(msg.to_string())
    }
}
