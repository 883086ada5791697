//! Alert delivery channels

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::alert::{Alert, AlertSeverity};
use crate::config::ChannelConfig;
use crate::error::{ConfigError, ConfigResult, DispatchError, DispatchResult};

/// Destination for raised alerts. Failures are reported, never retried here.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Lowest severity this channel wants to receive
    fn min_severity(&self) -> AlertSeverity {
        AlertSeverity::Low
    }

    fn accepts(&self, alert: &Alert) -> bool {
        alert.severity >= self.min_severity()
    }

    async fn send(&self, alert: &Alert) -> DispatchResult<()>;
}

/// Writes alerts to the structured log at a level matching their severity
pub struct LogChannel {
    min_severity: AlertSeverity,
}

impl LogChannel {
    pub fn new(min_severity: AlertSeverity) -> Self {
        Self { min_severity }
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }

    async fn send(&self, alert: &Alert) -> DispatchResult<()> {
        match alert.severity {
            AlertSeverity::Critical => {
                error!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    metric = %alert.metric,
                    description = %alert.description,
                    "CRITICAL ALERT: {}", alert.title
                );
            }
            AlertSeverity::High | AlertSeverity::Medium => {
                warn!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    metric = %alert.metric,
                    description = %alert.description,
                    "ALERT: {}", alert.title
                );
            }
            AlertSeverity::Low => {
                info!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    metric = %alert.metric,
                    "Alert: {}", alert.title
                );
            }
        }
        Ok(())
    }
}

/// POSTs each alert as JSON
pub struct WebhookChannel {
    name: String,
    url: String,
    client: Client,
    headers: HashMap<String, String>,
    min_severity: AlertSeverity,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new(
        url: impl Into<String>,
        min_severity: AlertSeverity,
        timeout: Duration,
        headers: HashMap<String, String>,
    ) -> ConfigResult<Self> {
        let url = url.into();
        let client = Client::builder().timeout(timeout).build().map_err(|e| ConfigError::InvalidValue {
            field: "alerting.channels.url".to_string(),
            value: format!("{} ({})", url, e),
        })?;

        Ok(Self {
            name: format!("webhook:{}", url),
            url,
            client,
            headers,
            min_severity,
            timeout,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }

    async fn send(&self, alert: &Alert) -> DispatchResult<()> {
        let mut request = self.client.post(&self.url).json(alert);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout {
                    channel: self.name.clone(),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                DispatchError::ChannelFailed {
                    channel: self.name.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DispatchError::ChannelFailed {
                channel: self.name.clone(),
                reason: format!("webhook responded with status {}", response.status()),
            })
        }
    }
}

/// Build the configured channels
pub fn from_config(configs: &[ChannelConfig]) -> ConfigResult<Vec<Arc<dyn AlertChannel>>> {
    configs
        .iter()
        .map(|config| -> ConfigResult<Arc<dyn AlertChannel>> {
            match config {
                ChannelConfig::Log { min_severity } => Ok(Arc::new(LogChannel::new(*min_severity))),
                ChannelConfig::Webhook {
                    url,
                    min_severity,
                    timeout_secs,
                    headers,
                } => Ok(Arc::new(WebhookChannel::new(
                    url.clone(),
                    *min_severity,
                    Duration::from_secs(*timeout_secs),
                    headers.clone(),
                )?)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertType, CandidateAlert};
    use chrono::Utc;

    fn alert(severity: AlertSeverity) -> Alert {
        Alert::from_candidate(
            CandidateAlert::new(AlertType::ThresholdBreach, severity, "performance.uptime", "uptime low"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_log_channel_accepts_by_severity() {
        let channel = LogChannel::new(AlertSeverity::High);
        assert!(!channel.accepts(&alert(AlertSeverity::Medium)));
        assert!(channel.accepts(&alert(AlertSeverity::Critical)));
        assert!(channel.send(&alert(AlertSeverity::Critical)).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_reports_failure() {
        // Port 9 (discard) on localhost is never an HTTP server in test environments
        let channel = WebhookChannel::new(
            "http://127.0.0.1:9/alerts",
            AlertSeverity::Low,
            Duration::from_millis(500),
            HashMap::new(),
        )
        .unwrap();

        let result = channel.send(&alert(AlertSeverity::High)).await;
        assert!(result.is_err());
        assert!(channel.name().starts_with("webhook:"));
    }

    #[test]
    fn test_from_config_builds_every_channel() {
        let channels = from_config(&[
            ChannelConfig::Log {
                min_severity: AlertSeverity::Low,
            },
            ChannelConfig::Webhook {
                url: "https://hooks.example.org/dao".to_string(),
                min_severity: AlertSeverity::High,
                timeout_secs: 5,
                headers: HashMap::new(),
            },
        ])
        .unwrap();

        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name(), "log");
        assert_eq!(channels[1].min_severity(), AlertSeverity::High);
    }
}
