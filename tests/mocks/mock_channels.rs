use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use dao_monitor::error::DispatchResult;
use dao_monitor::{Alert, AlertChannel, AlertSeverity, DispatchError};

/// Keeps every alert it receives
pub struct RecordingChannel {
    name: String,
    min_severity: AlertSeverity,
    received: Mutex<Vec<Alert>>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_severity: AlertSeverity::Low,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_min_severity(mut self, severity: AlertSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn received(&self) -> Vec<Alert> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }

    async fn send(&self, alert: &Alert) -> DispatchResult<()> {
        self.received.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Fails every send, optionally after hanging for `delay`
pub struct FailingChannel {
    name: String,
    delay: Option<Duration>,
    attempts: AtomicUsize,
}

impl FailingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Hang for `delay` before failing, to exercise the dispatch timeout
    pub fn hanging(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(name)
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertChannel for FailingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _alert: &Alert) -> DispatchResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(DispatchError::ChannelFailed {
            channel: self.name.clone(),
            reason: "connection refused".to_string(),
        })
    }
}
