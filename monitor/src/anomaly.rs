//! Rolling z-score anomaly detection
//!
//! One [`AnomalyWindow`] per tracked metric path. The detector polls the
//! store for samples appended since its last visit, so every sample is
//! observed exactly once and in append (chronological) order.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::alert::{AlertSeverity, AlertType, CandidateAlert};
use crate::config::AnomalyConfig;
use crate::error::ConfigResult;
use crate::sample::{MetricCategory, MetricPath};
use crate::store::MetricStore;

/// Bounded ring buffer with incrementally maintained mean and variance.
///
/// Uses Welford's update on push and its inverse on eviction. The sums are
/// rebuilt from the buffer once per full rotation so rounding error cannot
/// accumulate across evictions.
#[derive(Debug, Clone)]
pub struct AnomalyWindow {
    capacity: usize,
    values: VecDeque<f64>,
    mean: f64,
    m2: f64,
    evictions: usize,
}

impl AnomalyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            mean: 0.0,
            m2: 0.0,
            evictions: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                self.remove(oldest);
                self.evictions += 1;
            }
        }

        self.values.push_back(value);
        let n = self.values.len() as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
        self.m2 = self.m2.max(0.0);

        if self.evictions >= self.capacity {
            self.recompute();
        }
    }

    fn remove(&mut self, value: f64) {
        let remaining = self.values.len();
        if remaining == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let n = (remaining + 1) as f64;
        let old_mean = self.mean;
        self.mean = (n * old_mean - value) / (n - 1.0);
        self.m2 -= (value - old_mean) * (value - self.mean);
        self.m2 = self.m2.max(0.0);
    }

    fn recompute(&mut self) {
        let n = self.values.len() as f64;
        self.mean = self.values.iter().sum::<f64>() / n;
        self.m2 = self.values.iter().map(|v| (v - self.mean).powi(2)).sum();
        self.evictions = 0;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance of the buffer
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.m2 / self.values.len() as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Result of one polling pass
#[derive(Debug, Default)]
pub struct DetectionPass {
    pub candidates: Vec<CandidateAlert>,
    pub observed: usize,
    /// Samples pruned before the detector could observe them
    pub missed: u64,
}

pub struct AnomalyDetector {
    threshold: f64,
    min_samples: usize,
    window_size: usize,
    windows: HashMap<MetricPath, AnomalyWindow>,
    cursors: HashMap<MetricCategory, u64>,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig) -> ConfigResult<Self> {
        let mut windows = HashMap::new();
        for metric in &config.tracked_metrics {
            let path = MetricPath::parse(metric)?;
            windows.insert(path, AnomalyWindow::new(config.window_size));
        }

        Ok(Self {
            threshold: config.z_score_threshold,
            min_samples: config.min_samples,
            window_size: config.window_size,
            windows,
            cursors: HashMap::new(),
        })
    }

    pub fn tracked(&self) -> impl Iterator<Item = &MetricPath> {
        self.windows.keys()
    }

    pub fn window(&self, path: &MetricPath) -> Option<&AnomalyWindow> {
        self.windows.get(path)
    }

    /// Feed one value and report it if it is anomalous.
    ///
    /// The value joins the window first; detection then needs strictly more
    /// than `min_samples` values so at least `min_samples` prior observations
    /// back the statistics. A flat window (zero deviation) never alerts.
    ///
    /// Because the value is part of its own mean and (population) deviation,
    /// the z-score of an `n` value window is bounded by `sqrt(n - 1)`. A threshold
    /// at or above that bound for the configured `window_size` can never fire.
    pub fn observe(&mut self, path: &MetricPath, value: f64) -> Option<CandidateAlert> {
        if !value.is_finite() {
            debug!(metric = %path, value, "Ignoring non-finite value");
            return None;
        }

        let threshold = self.threshold;
        let min_samples = self.min_samples;
        let window = self.windows.get_mut(path)?;
        window.push(value);

        if window.len() <= min_samples {
            return None;
        }

        let std_dev = window.std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return None;
        }

        let mean = window.mean();
        let z_score = (value - mean).abs() / std_dev;
        if z_score <= threshold {
            return None;
        }

        let severity = if z_score >= threshold * 2.0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };

        Some(
            CandidateAlert::new(
                AlertType::AnomalyDetected,
                severity,
                path.to_string(),
                format!("Anomalous {}", path),
            )
            .with_description(format!(
                "{} = {} deviates {:.2} standard deviations from the rolling mean {:.2}",
                path, value, z_score, mean
            ))
            .with_metric("zScore", z_score)
            .with_metric("mean", mean)
            .with_metric("stdDev", std_dev)
            .with_metric("latestValue", value),
        )
    }

    /// Observe every sample appended to the store since the previous pass
    pub async fn poll(&mut self, store: &MetricStore) -> DetectionPass {
        let mut pass = DetectionPass::default();

        let mut categories: Vec<MetricCategory> = self.windows.keys().map(|path| path.category).collect();
        categories.sort();
        categories.dedup();

        for category in categories {
            let cursor = self.cursors.get(&category).copied().unwrap_or(0);
            let batch = store.samples_since(category, cursor).await;
            self.cursors.insert(category, batch.cursor);

            if batch.missed > 0 {
                warn!(%category, missed = batch.missed, "Samples pruned before anomaly detection saw them");
                pass.missed += batch.missed;
            }

            let mut paths: Vec<MetricPath> = self
                .windows
                .keys()
                .filter(|path| path.category == category)
                .cloned()
                .collect();
            paths.sort();

            for sample in &batch.samples {
                for path in &paths {
                    if let Some(value) = sample.value(&path.field) {
                        pass.observed += 1;
                        if let Some(candidate) = self.observe(path, value) {
                            pass.candidates.push(candidate);
                        }
                    }
                }
            }
        }

        pass
    }

    /// Forget every window and cursor
    pub fn reset(&mut self) {
        let window_size = self.window_size;
        for window in self.windows.values_mut() {
            *window = AnomalyWindow::new(window_size);
        }
        self.cursors.clear();
    }
}
