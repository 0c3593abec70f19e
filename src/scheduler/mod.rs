// Scheduler module
// Periodic re-capture of configured seed URLs


use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crawler::{CaptureController, validate_url};
use crate::database::Database;
use crate::{CaptureError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between two runs of the seed capture job
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    #[inline]
    fn default() -> Self {
        Self {
            interval_minutes: 60,
        }
    }
}

impl ScheduleConfig {
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SchedulerState::NotStarted => write!(f, "Not started"),
            SchedulerState::Running => write!(f, "Running"),
            SchedulerState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub interval: Option<Duration>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub runs_completed: u64,
}

#[derive(Debug, Default)]
struct RunTimes {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    runs_completed: u64,
}

/// The loop currently driving the job
#[derive(Debug)]
struct ActiveJob {
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    times: Arc<Mutex<RunTimes>>,
}

#[derive(Debug)]
struct ManagerInner {
    state: SchedulerState,
    active: Option<ActiveJob>,
    /// Run times of the last stopped job, kept for status reports
    finished: Option<(Duration, Arc<Mutex<RunTimes>>)>,
}

/// Owns the periodic job and its lifecycle.
///
/// `start`, `stop` and `status` are serialized through one lock. Stopping
/// never interrupts a run that is already in progress; the loop exits once
/// that run returns.
#[derive(Debug)]
pub struct JobManager {
    inner: Mutex<ManagerInner>,
}

impl Default for JobManager {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                state: SchedulerState::NotStarted,
                active: None,
                finished: None,
            }),
        }
    }

    /// Run `job` every `interval`, first after one full interval.
    ///
    /// Starting a running manager replaces its job and interval.
    #[inline]
    pub async fn start<F, Fut>(&self, interval: Duration, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(CaptureError::Scheduler(
                "interval must be greater than zero".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;

        if let Some(previous) = inner.active.take() {
            info!(
                "Reconfiguring scheduler: interval {:?} -> {:?}",
                previous.interval, interval
            );
            let _ = previous.shutdown.send(true);
        }

        let times = Arc::new(Mutex::new(RunTimes {
            next_run: Some(next_run_after(interval)),
            ..RunTimes::default()
        }));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(interval, job, Arc::clone(&times), shutdown_rx));

        inner.active = Some(ActiveJob {
            interval,
            shutdown,
            handle,
            times,
        });
        inner.state = SchedulerState::Running;

        info!("Scheduler started with interval {:?}", interval);
        Ok(())
    }

    /// Stop the running job. Fails when nothing is running.
    #[inline]
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let Some(active) = inner.active.take() else {
            return Err(CaptureError::Scheduler(format!(
                "scheduler is not running (state: {})",
                inner.state
            )));
        };

        let _ = active.shutdown.send(true);
        if active.handle.is_finished() {
            debug!("Scheduler loop had already exited");
        }
        active.times.lock().await.next_run = None;

        inner.finished = Some((active.interval, active.times));
        inner.state = SchedulerState::Stopped;

        info!("Scheduler stopped");
        Ok(())
    }

    #[inline]
    pub async fn status(&self) -> SchedulerStatus {
        let inner = self.inner.lock().await;

        let source = inner
            .active
            .as_ref()
            .map(|active| (active.interval, Arc::clone(&active.times)))
            .or_else(|| {
                inner
                    .finished
                    .as_ref()
                    .map(|(interval, times)| (*interval, Arc::clone(times)))
            });

        match source {
            Some((interval, times)) => {
                let times = times.lock().await;
                SchedulerStatus {
                    state: inner.state,
                    interval: Some(interval),
                    last_run: times.last_run,
                    next_run: times.next_run,
                    runs_completed: times.runs_completed,
                }
            }
            None => SchedulerStatus {
                state: inner.state,
                interval: None,
                last_run: None,
                next_run: None,
                runs_completed: 0,
            },
        }
    }

    #[inline]
    pub async fn state(&self) -> SchedulerState {
        self.inner.lock().await.state
    }
}

fn next_run_after(interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

async fn run_loop<F, Fut>(
    interval: Duration,
    job: F,
    times: Arc<Mutex<RunTimes>>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        times.lock().await.last_run = Some(Utc::now());
        debug!("Scheduled job starting");

        // Runs to completion even if a stop arrives meanwhile
        job().await;

        let mut times = times.lock().await;
        times.runs_completed += 1;
        if !*shutdown.borrow() {
            times.next_run = Some(next_run_after(interval));
        }
    }

    debug!("Scheduler loop exited");
}

/// Outcome of one pass over the configured seeds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduledRunSummary {
    pub seeds: usize,
    pub captured: usize,
    pub failed: usize,
}

/// Capture every configured seed once.
///
/// The configuration is read from `config_dir` on every call so edits apply
/// to the next run. A failing seed is logged and does not stop the others.
#[inline]
pub async fn run_scheduled_captures(
    database: &Database,
    config_dir: &Path,
) -> Result<ScheduledRunSummary> {
    let config = Config::load(config_dir).map_err(|e| CaptureError::Config(format!("{e:#}")))?;
    let controller = CaptureController::new(database.clone(), &config);

    let mut summary = ScheduledRunSummary {
        seeds: config.seeds.len(),
        ..ScheduledRunSummary::default()
    };
    info!("Scheduled capture of {} seeds", summary.seeds);

    for seed in &config.seeds {
        let url = match validate_url(seed) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping invalid seed {}: {}", seed, e);
                summary.failed += 1;
                continue;
            }
        };

        match controller.capture(&url, 0).await {
            Ok(report) => {
                debug!(
                    "Seed {} captured: {} pages",
                    seed, report.stats.pages_captured
                );
                summary.captured += 1;
            }
            Err(e) => {
                error!("Scheduled capture of {} failed: {}", seed, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Scheduled run finished: {} captured, {} failed",
        summary.captured, summary.failed
    );
    Ok(summary)
}
