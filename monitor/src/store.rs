//! Retention-bounded, per-category time-series store
//!
//! Each category lives behind its own lock so unrelated categories never
//! contend. Readers always take a snapshot under the read lock and compute
//! outside it; pruning therefore never races with an evaluator mid-read.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{MonitorError, Result};
use crate::sample::{MetricCategory, MetricSample, MetricPath};

/// Convert a retention window into a chrono duration.
///
/// Windows too large for chrono cannot be reasoned about and are reported as
/// an invariant violation of the calling subsystem.
pub fn window_to_chrono(subsystem: &str, window: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(window)
        .map_err(|_| MonitorError::invariant(subsystem, format!("retention window {:?} is out of range", window)))
}

/// Inclusive time range used by series queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start) && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Read-only snapshot of one series, filtered lazily on iteration.
///
/// Iterating twice yields the same samples; the snapshot never observes
/// appends or prunes that happen after it was taken.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    category: MetricCategory,
    samples: Arc<Vec<MetricSample>>,
    range: TimeRange,
}

impl SeriesSnapshot {
    pub fn category(&self) -> MetricCategory {
        self.category
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> + '_ {
        let range = self.range;
        self.samples.iter().filter(move |sample| range.contains(sample.timestamp))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Values of one field in chronological order
    pub fn values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.iter().filter_map(move |sample| sample.value(field))
    }
}

impl<'a> IntoIterator for &'a SeriesSnapshot {
    type Item = &'a MetricSample;
    type IntoIter = Box<dyn Iterator<Item = &'a MetricSample> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Outcome of a single append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The sample landed; `pruned` older samples were dropped afterwards
    Appended { pruned: usize },
    /// The store is sealed for shutdown and rejected the sample
    Sealed,
}

/// Samples appended after a cursor, see [`MetricStore::samples_since`]
#[derive(Debug, Clone, Default)]
pub struct SamplesSince {
    pub samples: Vec<MetricSample>,
    /// Cursor to pass on the next call
    pub cursor: u64,
    /// Samples pruned before the caller ever saw them
    pub missed: u64,
}

/// Ordered samples of one category
#[derive(Debug)]
pub struct TimeSeries {
    category: MetricCategory,
    samples: VecDeque<MetricSample>,
    appended: u64,
    sealed: bool,
}

impl TimeSeries {
    pub fn new(category: MetricCategory) -> Self {
        Self {
            category,
            samples: VecDeque::new(),
            appended: 0,
            sealed: false,
        }
    }

    fn append(&mut self, sample: MetricSample) -> Result<bool> {
        if self.sealed {
            return Ok(false);
        }
        if sample.category != self.category {
            return Err(MonitorError::invariant(
                "store",
                format!("{} sample appended to {} series", sample.category, self.category),
            ));
        }
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(MonitorError::invariant(
                    "store",
                    format!(
                        "{} sample at {} is older than the series head at {}",
                        self.category, sample.timestamp, last.timestamp
                    ),
                ));
            }
        }

        self.samples.push_back(sample);
        self.appended += 1;
        Ok(true)
    }

    /// Drop samples older than `window`, always keeping the most recent one
    fn prune(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let cutoff = now - window;
        let mut pruned = 0;
        while self.samples.len() > 1 {
            match self.samples.front() {
                Some(front) if front.timestamp < cutoff => {
                    self.samples.pop_front();
                    pruned += 1;
                }
                _ => break,
            }
        }
        pruned
    }

    fn since(&self, cursor: u64) -> SamplesSince {
        let first_index = self.appended - self.samples.len() as u64;
        let start = cursor.max(first_index);
        let skip = (start - first_index) as usize;

        SamplesSince {
            samples: self.samples.iter().skip(skip).cloned().collect(),
            cursor: self.appended,
            missed: first_index.saturating_sub(cursor),
        }
    }
}

/// The five per-category series
pub struct MetricStore {
    series: HashMap<MetricCategory, RwLock<TimeSeries>>,
}

impl MetricStore {
    pub fn new() -> Self {
        let series = MetricCategory::ALL
            .iter()
            .map(|category| (*category, RwLock::new(TimeSeries::new(*category))))
            .collect();
        Self { series }
    }

    fn series(&self, category: MetricCategory) -> &RwLock<TimeSeries> {
        // Every category is inserted in `new`
        &self.series[&category]
    }

    /// Append a sample and immediately apply the category's retention window
    pub async fn append(&self, sample: MetricSample, window: Duration, now: DateTime<Utc>) -> Result<AppendOutcome> {
        self.append_with(sample, window, now, |_| {}).await
    }

    /// Like [`MetricStore::append`], running `on_append` before the series
    /// lock is released. Nothing runs for a sealed series, so `on_append`
    /// can never observe a sample after [`MetricStore::seal`] returns.
    pub async fn append_with<F>(
        &self,
        sample: MetricSample,
        window: Duration,
        now: DateTime<Utc>,
        on_append: F,
    ) -> Result<AppendOutcome>
    where
        F: FnOnce(&MetricSample),
    {
        let window = window_to_chrono("store", window)?;
        let mut series = self.series(sample.category).write().await;
        if !series.append(sample)? {
            return Ok(AppendOutcome::Sealed);
        }
        if let Some(appended) = series.samples.back() {
            on_append(appended);
        }
        let pruned = series.prune(now, window);
        Ok(AppendOutcome::Appended { pruned })
    }

    /// Remove samples older than `window`; the newest sample always survives.
    /// A sealed series is left untouched.
    pub async fn prune(&self, category: MetricCategory, window: Duration, now: DateTime<Utc>) -> Result<usize> {
        let window = window_to_chrono("retention", window)?;
        let mut series = self.series(category).write().await;
        if series.sealed {
            return Ok(0);
        }
        Ok(series.prune(now, window))
    }

    pub async fn latest(&self, category: MetricCategory) -> Option<MetricSample> {
        self.series(category).read().await.samples.back().cloned()
    }

    /// Most recent value of a metric path, if any sample carries it
    pub async fn latest_value(&self, path: &MetricPath) -> Option<(DateTime<Utc>, f64)> {
        let series = self.series(path.category).read().await;
        series
            .samples
            .back()
            .and_then(|sample| sample.value(&path.field).map(|value| (sample.timestamp, value)))
    }

    pub async fn query(&self, category: MetricCategory, range: TimeRange) -> SeriesSnapshot {
        let samples: Vec<MetricSample> = {
            let series = self.series(category).read().await;
            series.samples.iter().cloned().collect()
        };
        SeriesSnapshot {
            category,
            samples: Arc::new(samples),
            range,
        }
    }

    /// Samples appended after `cursor`, in append order
    pub async fn samples_since(&self, category: MetricCategory, cursor: u64) -> SamplesSince {
        self.series(category).read().await.since(cursor)
    }

    pub async fn len(&self, category: MetricCategory) -> usize {
        self.series(category).read().await.samples.len()
    }

    /// Reject every append from now on. Waits for in-progress appends.
    pub async fn seal(&self) {
        for category in MetricCategory::ALL {
            self.series(category).write().await.sealed = true;
        }
    }

    pub async fn unseal(&self) {
        for category in MetricCategory::ALL {
            self.series(category).write().await.sealed = false;
        }
    }

    pub async fn is_sealed(&self) -> bool {
        self.series(MetricCategory::User).read().await.sealed
    }

    /// Replace a series with previously persisted samples
    pub async fn restore(&self, category: MetricCategory, mut samples: Vec<MetricSample>) -> Result<()> {
        samples.retain(|sample| sample.category == category);
        samples.sort_by_key(|sample| sample.timestamp);

        let mut series = self.series(category).write().await;
        *series = TimeSeries::new(category);
        for sample in samples {
            series.append(sample)?;
        }
        Ok(())
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}
