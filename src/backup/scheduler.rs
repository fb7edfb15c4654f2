//! Backup scheduler
//!
//! A background task wakes up every `check_interval_secs` and runs a
//! due-check: load the schedule, skip if disabled or if the current period
//! already has a scheduled backup, otherwise compare the wall clock with the
//! configured time. A due backup is followed by a retention cleanup. Errors
//! are logged and never stop the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::catalog::{day_bucket, month_bucket, week_bucket, BackupClass, BackupMetadata};
use super::packager::BackupResult;
use super::retention::CleanupReport;
use super::service::BackupService;
use crate::config::schedule::{BackupScheduleConfig, Frequency};
use crate::error::FailureStage;

/// Result of evaluating the schedule against the clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueDecision {
    Disabled,
    /// A scheduled backup already exists for this period
    AlreadyDone { period: String },
    NotDue,
    Due { class: BackupClass },
}

/// Decide whether a scheduled backup should start at `now`
///
/// At most one scheduled backup is taken per day, ISO week or month,
/// depending on the frequency. The configured time matches when `now` falls
/// in `[hour:minute, hour:minute + window_minutes)`; weekly schedules must
/// also be on the configured weekday (0 = Sunday). The first scheduled
/// backup of a month is classed monthly, later ones weekly.
pub fn evaluate_due(
    config: &BackupScheduleConfig,
    now: DateTime<Utc>,
    entries: &[BackupMetadata],
    window_minutes: u32,
) -> DueDecision {
    if !config.enabled {
        return DueDecision::Disabled;
    }

    let scheduled = || entries.iter().filter(|e| e.class != BackupClass::Manual);

    let period = match config.frequency {
        Frequency::Daily => day_bucket(now),
        Frequency::Weekly => week_bucket(now),
        Frequency::Monthly => month_bucket(now),
    };
    let period_of = |e: &BackupMetadata| match config.frequency {
        Frequency::Daily => day_bucket(e.created),
        Frequency::Weekly => e.week.clone(),
        Frequency::Monthly => e.month.clone(),
    };
    if scheduled().any(|e| period_of(e) == period) {
        return DueDecision::AlreadyDone { period };
    }

    if config.frequency == Frequency::Weekly && now.weekday().num_days_from_sunday() != config.day_of_week {
        return DueDecision::NotDue;
    }

    let now_minutes = i64::from(now.hour() * 60 + now.minute());
    let target_minutes = i64::from(config.hour * 60 + config.minute);
    let offset = now_minutes - target_minutes;
    if offset < 0 || offset >= i64::from(window_minutes) {
        return DueDecision::NotDue;
    }

    let month = month_bucket(now);
    let class = if scheduled().any(|e| e.month == month) {
        BackupClass::Weekly
    } else {
        BackupClass::Monthly
    };
    DueDecision::Due { class }
}

/// Outcome of one due-check
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CheckOutcome {
    Disabled,
    AlreadyBackedUp {
        period: String,
    },
    NotDue,
    Completed {
        result: BackupResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        cleanup: Option<CleanupReport>,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<FailureStage>,
    },
}

/// Snapshot of the scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_check: Option<DateTime<Utc>>,
    pub check_interval_secs: u64,
}

#[derive(Default)]
struct LoopState {
    handle: Option<JoinHandle<()>>,
    next_check: Option<DateTime<Utc>>,
}

struct SchedulerInner {
    service: Arc<BackupService>,
    state: Mutex<LoopState>,
}

/// Owns the periodic due-check task
///
/// Cloning is cheap; clones control the same loop.
#[derive(Clone)]
pub struct BackupScheduler {
    inner: Arc<SchedulerInner>,
}

impl BackupScheduler {
    pub fn new(service: Arc<BackupService>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                state: Mutex::new(LoopState::default()),
            }),
        }
    }

    /// Start the background loop; returns `false` if it was already running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.inner.lock_state();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let interval = self.inner.service.settings().check_interval();
        state.next_check = Some(self.inner.next_check_after(interval));

        let inner = Arc::clone(&self.inner);
        state.handle = Some(tokio::spawn(async move { inner.run_loop(interval).await }));

        tracing::info!(interval_secs = interval.as_secs(), "Backup scheduler started");
        true
    }

    /// Stop the background loop; returns `false` if it was not running
    pub fn stop(&self) -> bool {
        let mut state = self.inner.lock_state();
        state.next_check = None;
        match state.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                tracing::info!("Backup scheduler stopped");
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.lock_state();
        let running = state.handle.as_ref().is_some_and(|h| !h.is_finished());
        SchedulerStatus {
            running,
            next_check: if running { state.next_check } else { None },
            check_interval_secs: self.inner.service.settings().check_interval().as_secs(),
        }
    }

    /// Run one due-check now, independent of the background loop
    pub async fn trigger_check_now(&self) -> CheckOutcome {
        self.inner.check().await
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_check_after(&self, interval: Duration) -> DateTime<Utc> {
        let now = self.service.now();
        chrono::Duration::from_std(interval)
            .ok()
            .and_then(|step| now.checked_add_signed(step))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn run_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.lock_state().next_check = Some(self.next_check_after(interval));

            match self.check().await {
                CheckOutcome::Failed { error, stage } => {
                    tracing::error!(error = %error, stage = ?stage, "Scheduled backup check failed");
                }
                CheckOutcome::Completed { result, .. } => {
                    tracing::info!(
                        file = result.file_name.as_deref().unwrap_or_default(),
                        "Scheduled backup completed"
                    );
                }
                outcome => {
                    tracing::debug!(outcome = ?outcome, "Scheduled backup not needed");
                }
            }
        }
    }

    async fn check(&self) -> CheckOutcome {
        let config = self.service.schedule_config();
        let now = self.service.now();

        let entries = match self.service.list_backups() {
            Ok(entries) => entries,
            Err(e) => {
                return CheckOutcome::Failed {
                    error: e.to_string(),
                    stage: Some(e.stage()),
                }
            }
        };

        let window = self.service.settings().due_window_minutes;
        let class = match evaluate_due(&config, now, &entries, window) {
            DueDecision::Disabled => return CheckOutcome::Disabled,
            DueDecision::AlreadyDone { period } => return CheckOutcome::AlreadyBackedUp { period },
            DueDecision::NotDue => return CheckOutcome::NotDue,
            DueDecision::Due { class } => class,
        };

        tracing::info!(class = %class, frequency = ?config.frequency, "Scheduled backup due");

        let result = self.service.run_scheduled(&config.databases, class).await;
        if !result.success {
            return CheckOutcome::Failed {
                error: result.error.unwrap_or_else(|| "backup failed".to_string()),
                stage: result.failed_stage,
            };
        }

        let cleanup = match self.service.cleanup_with(config.retention).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "Retention cleanup after scheduled backup failed");
                None
            }
        };

        CheckOutcome::Completed { result, cleanup }
    }
}
