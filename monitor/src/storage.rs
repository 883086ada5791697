//! JSON Lines persistence for series and alerts
//!
//! Layout under the configured directory:
//!
//! ```text
//! series/<category>.jsonl   one MetricSample per line, chronological
//! alerts.jsonl              one Alert per line; the last record per id wins
//! ```
//!
//! Appends happen as state changes. A compacted snapshot replaces both
//! journals at shutdown, written to a temporary file and renamed into place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::alert::Alert;
use crate::error::{MonitorError, Result};
use crate::sample::{MetricCategory, MetricSample};

pub struct Persistence {
    base_path: PathBuf,
    // Serializes appends and snapshot replacement
    write_lock: Mutex<()>,
}

impl Persistence {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let persistence = Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        };
        persistence.initialize_directories()?;
        Ok(persistence)
    }

    fn initialize_directories(&self) -> Result<()> {
        let series_dir = self.base_path.join("series");
        fs::create_dir_all(&series_dir).map_err(|e| MonitorError::persistence(&series_dir, e))?;
        info!("Initialized persistence directory at: {}", self.base_path.display());
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn series_path(&self, category: MetricCategory) -> PathBuf {
        self.base_path.join("series").join(format!("{}.jsonl", category))
    }

    pub fn alerts_path(&self) -> PathBuf {
        self.base_path.join("alerts.jsonl")
    }

    pub fn append_sample(&self, sample: &MetricSample) -> Result<()> {
        self.append_line(&self.series_path(sample.category), sample)
    }

    pub fn append_alert(&self, alert: &Alert) -> Result<()> {
        self.append_line(&self.alerts_path(), alert)
    }

    fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = lock(&self.write_lock);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MonitorError::persistence(path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| MonitorError::persistence(path, e))
    }

    /// Replace every journal with a compacted snapshot
    pub fn write_snapshot(&self, series: &[(MetricCategory, Vec<MetricSample>)], alerts: &[Alert]) -> Result<()> {
        let _guard = lock(&self.write_lock);
        for (category, samples) in series {
            replace_file(&self.series_path(*category), samples)?;
        }
        replace_file(&self.alerts_path(), alerts)?;

        let sample_count: usize = series.iter().map(|(_, samples)| samples.len()).sum();
        info!(
            samples = sample_count,
            alerts = alerts.len(),
            "Wrote snapshot to {}",
            self.base_path.display()
        );
        Ok(())
    }

    pub fn load_series(&self, category: MetricCategory) -> Result<Vec<MetricSample>> {
        read_lines(&self.series_path(category))
    }

    /// Latest record per alert id, ordered by alert timestamp
    pub fn load_alerts(&self) -> Result<Vec<Alert>> {
        let records: Vec<Alert> = read_lines(&self.alerts_path())?;

        let mut latest: HashMap<String, Alert> = HashMap::new();
        for alert in records {
            latest.insert(alert.id.clone(), alert);
        }

        let mut alerts: Vec<Alert> = latest.into_values().collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(alerts)
    }
}

fn lock(mutex: &Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn replace_file<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let temp_path = path.with_extension("jsonl.tmp");
    {
        let file = File::create(&temp_path).map_err(|e| MonitorError::persistence(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n").map_err(|e| MonitorError::persistence(&temp_path, e))?;
        }
        writer.flush().map_err(|e| MonitorError::persistence(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        MonitorError::persistence(path, format!("failed to rename {}: {}", temp_path.display(), e))
    })
}

/// Read every decodable line. A torn trailing line from a crash is skipped.
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).map_err(|e| MonitorError::persistence(path, e))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| MonitorError::persistence(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line = index + 1, "Skipping unreadable record: {}", e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertSeverity, AlertType, CandidateAlert};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample(value: f64) -> MetricSample {
        let mut fields = BTreeMap::new();
        fields.insert("active_users".to_string(), value);
        MetricSample::new(MetricCategory::User, Utc::now(), fields)
    }

    #[test]
    fn test_series_journal_appends() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Persistence::new(temp_dir.path()).unwrap();

        persistence.append_sample(&sample(1.0)).unwrap();
        persistence.append_sample(&sample(2.0)).unwrap();

        let loaded = persistence.load_series(MetricCategory::User).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].value("active_users"), Some(2.0));
        assert!(persistence.load_series(MetricCategory::Feedback).unwrap().is_empty());
    }

    #[test]
    fn test_latest_alert_record_wins() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Persistence::new(temp_dir.path()).unwrap();

        let mut alert = Alert::from_candidate(
            CandidateAlert::new(AlertType::ThresholdBreach, AlertSeverity::High, "performance.error_rate", "errors"),
            Utc::now(),
        );
        persistence.append_alert(&alert).unwrap();
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        persistence.append_alert(&alert).unwrap();

        let loaded = persistence.load_alerts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].resolved);
    }

    #[test]
    fn test_snapshot_compacts_journal() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Persistence::new(temp_dir.path()).unwrap();
        for i in 0..5 {
            persistence.append_sample(&sample(i as f64)).unwrap();
        }

        persistence
            .write_snapshot(&[(MetricCategory::User, vec![sample(9.0)])], &[])
            .unwrap();

        let loaded = persistence.load_series(MetricCategory::User).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!persistence.series_path(MetricCategory::User).with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Persistence::new(temp_dir.path()).unwrap();
        persistence.append_sample(&sample(1.0)).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(persistence.series_path(MetricCategory::User))
            .unwrap();
        file.write_all(b"{\"timestamp\":\"2024-").unwrap();

        assert_eq!(persistence.load_series(MetricCategory::User).unwrap().len(), 1);
    }
}
