//! Independent periodic tasks
//!
//! Every task owns a tokio task with its own interval. The first run happens
//! immediately. A run is awaited inline, so one task never overlaps itself;
//! ticks that come due while a run is in flight are skipped rather than
//! queued (`MissedTickBehavior::Skip`). Cancellation is cooperative: a run
//! in progress is allowed to finish.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, MonitorError, Result};
use crate::metrics::EngineMetrics;
use crate::oplog::{OperationalEventKind, OperationalLog};

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct TaskStatus {
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    running: AtomicBool,
    disabled: AtomicBool,
}

/// Point-in-time view of one scheduled task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub interval_secs: u64,
    pub runs: u64,
    pub failures: u64,
    pub ticks_skipped: u64,
    pub running: bool,
    pub disabled: bool,
}

struct ScheduledTask {
    name: String,
    interval: Duration,
    status: Arc<TaskStatus>,
    handle: JoinHandle<()>,
}

/// Outcome of [`Scheduler::cancel_all`]
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub completed: Vec<String>,
    /// Tasks still running at the deadline; detached, not killed
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<ScheduledTask>,
    metrics: Arc<EngineMetrics>,
    oplog: Arc<OperationalLog>,
}

impl Scheduler {
    pub fn new(metrics: Arc<EngineMetrics>, oplog: Arc<OperationalLog>) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
            metrics,
            oplog,
        }
    }

    /// Register `task` to run every `interval`, starting now.
    ///
    /// A task returning an invariant violation is disabled until the
    /// scheduler is rebuilt. Any other error is logged and the next tick
    /// still fires.
    pub fn schedule<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, mut task: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if interval < MIN_INTERVAL {
            return Err(ConfigError::IntervalTooShort {
                field: name,
                seconds: interval.as_secs(),
            }
            .into());
        }
        if self.token.is_cancelled() {
            return Err(MonitorError::Scheduling(format!("scheduler is shut down, cannot add {}", name)));
        }

        let status = Arc::new(TaskStatus::default());
        let token = self.token.clone();
        let metrics = self.metrics.clone();
        let oplog = self.oplog.clone();
        let task_name = name.clone();
        let task_status = status.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                task_status.running.store(true, Ordering::SeqCst);
                let started = Instant::now();
                let result = match AssertUnwindSafe(task()).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(MonitorError::invariant(task_name.clone(), "task panicked")),
                };
                let elapsed = started.elapsed();
                task_status.running.store(false, Ordering::SeqCst);

                task_status.runs.fetch_add(1, Ordering::SeqCst);
                metrics.record_task_run(&task_name, elapsed, result.is_err());

                // Ticks that came due during the run beyond the one fired next
                let skipped = (elapsed.as_nanos() / interval.as_nanos()).saturating_sub(1) as u64;
                if skipped > 0 {
                    task_status.skipped.fetch_add(skipped, Ordering::SeqCst);
                    metrics.record_ticks_skipped(&task_name, skipped);
                    debug!(task = %task_name, skipped, "Run overran its interval, skipping ticks");
                }

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_critical() => {
                        task_status.failures.fetch_add(1, Ordering::SeqCst);
                        task_status.disabled.store(true, Ordering::SeqCst);
                        error!(task = %task_name, "Disabling task after invariant violation: {}", e);
                        oplog.record(OperationalEventKind::SubsystemDisabled, task_name.clone(), e.to_string());
                        break;
                    }
                    Err(e) => {
                        task_status.failures.fetch_add(1, Ordering::SeqCst);
                        warn!(task = %task_name, category = e.category(), "Task run failed: {}", e);
                        oplog.record(OperationalEventKind::TaskFailed, task_name.clone(), e.to_string());
                    }
                }
            }

            debug!(task = %task_name, "Task loop exited");
        });

        info!(task = %name, interval_secs = interval.as_secs(), "Scheduled task");
        self.tasks.push(ScheduledTask {
            name,
            interval,
            status,
            handle,
        });
        Ok(())
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.name.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .iter()
            .map(|task| TaskSnapshot {
                name: task.name.clone(),
                interval_secs: task.interval.as_secs(),
                runs: task.status.runs.load(Ordering::SeqCst),
                failures: task.status.failures.load(Ordering::SeqCst),
                ticks_skipped: task.status.skipped.load(Ordering::SeqCst),
                running: task.status.running.load(Ordering::SeqCst),
                disabled: task.status.disabled.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Stop accepting ticks and wait for in-flight runs, up to `timeout`
    pub async fn cancel_all(&mut self, timeout: Duration) -> ShutdownReport {
        self.token.cancel();
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        for mut task in self.tasks.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut task.handle).await {
                Ok(Ok(())) => report.completed.push(task.name),
                Ok(Err(join_error)) => {
                    error!(task = %task.name, "Task ended abnormally: {}", join_error);
                    self.oplog
                        .record(OperationalEventKind::TaskFailed, task.name.clone(), join_error.to_string());
                    report.completed.push(task.name);
                }
                Err(_) => {
                    warn!(task = %task.name, "Task still running at shutdown deadline, abandoning it");
                    self.oplog.record(
                        OperationalEventKind::TaskAbandoned,
                        task.name.clone(),
                        format!("still running after {:?}", timeout),
                    );
                    report.abandoned.push(task.name);
                }
            }
        }

        report
    }
}
