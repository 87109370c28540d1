//! Recurring background jobs
//!
//! Three cron jobs on one fixed-offset zone: the daily reminder pass, the
//! pending-queue drain and the hourly DPD sweep. The same jobs can be
//! triggered by hand; every run, timed or manual, goes through `execute`
//! so the per-job state stays accurate.

mod cron_zone;
mod jobs;

pub use jobs::{JobKind, JobReport, ReminderJobs, ReminderPassReport};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::SchedulerConfig;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Invalid schedule for {job}: {message}")]
    InvalidSchedule { job: &'static str, message: String },

    #[error("Scheduler error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
}

/// Last known state of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub cron: String,
    pub state: JobState,
    pub runs: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_success: Option<bool>,
    pub last_message: Option<String>,
}

/// Outcome of a manual trigger
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<JobReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    /// Cron entries registered with the running scheduler
    pub job_count: usize,
    pub timezone: String,
    pub next_run_times: HashMap<&'static str, Option<DateTime<Utc>>>,
    pub jobs: Vec<JobStatus>,
}

struct Running {
    scheduler: JobScheduler,
    job_ids: Vec<(JobKind, Uuid)>,
}

pub struct ReminderScheduler {
    jobs: ReminderJobs,
    config: SchedulerConfig,
    states: RwLock<HashMap<JobKind, JobStatus>>,
    running: Mutex<Option<Running>>,
}

impl ReminderScheduler {
    pub fn new(jobs: ReminderJobs, config: SchedulerConfig) -> Arc<Self> {
        let states = JobKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    JobStatus {
                        name: kind.name(),
                        cron: cron_for(&config, kind).to_string(),
                        state: JobState::Idle,
                        runs: 0,
                        last_started_at: None,
                        last_finished_at: None,
                        last_success: None,
                        last_message: None,
                    },
                )
            })
            .collect();

        Arc::new(Self {
            jobs,
            config,
            states: RwLock::new(states),
            running: Mutex::new(None),
        })
    }

    /// Register the three jobs and start ticking
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Backend(format!("{:?}", e)))?;

        let mut job_ids = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            let this = Arc::clone(self);
            let cron = cron_zone::to_utc_cron(
                cron_for(&self.config, kind),
                self.config.utc_offset_hours,
            )
            .map_err(|message| SchedulerError::InvalidSchedule {
                job: kind.name(),
                message,
            })?;
            let job = Job::new_async(cron.as_str(), move |_id, _scheduler| {
                let this = Arc::clone(&this);
                Box::pin(async move {
                    this.execute(kind, Utc::now()).await;
                })
            })
            .map_err(|e| SchedulerError::InvalidSchedule {
                job: kind.name(),
                message: format!("{:?}", e),
            })?;
            tracing::debug!(job = kind.name(), utc_cron = %cron, "Job registered");

            let id = scheduler
                .add(job)
                .await
                .map_err(|e| SchedulerError::Backend(format!("{:?}", e)))?;
            job_ids.push((kind, id));
        }

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Backend(format!("{:?}", e)))?;

        tracing::info!(
            timezone = %self.config.timezone,
            reminder_cron = %self.config.reminder_cron,
            pending_drain_cron = %self.config.pending_drain_cron,
            dpd_sweep_cron = %self.config.dpd_sweep_cron,
            "Scheduler started"
        );

        *running = Some(Running { scheduler, job_ids });
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let Some(Running { mut scheduler, .. }) = self.running.lock().await.take() else {
            return Ok(());
        };

        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulerError::Backend(format!("{:?}", e)))?;

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run one job now, tracking its state. Errors are logged, never raised.
    pub async fn execute(&self, kind: JobKind, now: DateTime<Utc>) -> TriggerResult {
        self.mark_started(kind, now).await;
        tracing::info!(job = kind.name(), "Job started");

        let result = self.jobs.run(kind, now).await;

        let trigger = match result {
            Ok(report) => {
                let message = report.summary();
                tracing::info!(job = kind.name(), %message, "Job finished");
                TriggerResult {
                    success: true,
                    message,
                    report: Some(report),
                }
            }
            Err(e) => {
                tracing::error!(job = kind.name(), error = %e, "Job failed");
                TriggerResult {
                    success: false,
                    message: e.to_string(),
                    report: None,
                }
            }
        };

        self.mark_finished(kind, &trigger).await;
        trigger
    }

    pub async fn trigger_reminder_pass(&self) -> TriggerResult {
        self.execute(JobKind::ReminderPass, Utc::now()).await
    }

    pub async fn trigger_pending_drain(&self) -> TriggerResult {
        self.execute(JobKind::PendingDrain, Utc::now()).await
    }

    pub async fn trigger_dpd_sweep(&self) -> TriggerResult {
        self.execute(JobKind::DpdSweep, Utc::now()).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut next_run_times: HashMap<&'static str, Option<DateTime<Utc>>> = JobKind::ALL
            .into_iter()
            .map(|kind| (kind.name(), None))
            .collect();

        let (running, job_count) = {
            let guard = self.running.lock().await;
            if let Some(Running { scheduler, job_ids }) = guard.as_ref() {
                let mut scheduler = scheduler.clone();
                for (kind, id) in job_ids {
                    match scheduler.next_tick_for_job(*id).await {
                        Ok(next) => {
                            next_run_times.insert(kind.name(), next);
                        }
                        Err(e) => {
                            tracing::warn!(job = kind.name(), error = ?e, "Failed to read next tick");
                        }
                    }
                }
                (true, job_ids.len())
            } else {
                (false, 0)
            }
        };

        let states = self.states.read().await;
        let jobs = JobKind::ALL
            .iter()
            .filter_map(|kind| states.get(kind).cloned())
            .collect::<Vec<_>>();

        SchedulerStatus {
            running,
            job_count,
            timezone: self.config.timezone.clone(),
            next_run_times,
            jobs,
        }
    }

    async fn mark_started(&self, kind: JobKind, now: DateTime<Utc>) {
        let mut states = self.states.write().await;
        if let Some(status) = states.get_mut(&kind) {
            if status.state == JobState::Running {
                // Jobs are idempotent, an overlapping run is allowed
                tracing::debug!(job = kind.name(), "Job already running, starting another run");
            }
            status.state = JobState::Running;
            status.last_started_at = Some(now);
        }
    }

    async fn mark_finished(&self, kind: JobKind, result: &TriggerResult) {
        let mut states = self.states.write().await;
        if let Some(status) = states.get_mut(&kind) {
            status.state = JobState::Idle;
            status.runs += 1;
            status.last_finished_at = Some(Utc::now());
            status.last_success = Some(result.success);
            status.last_message = Some(result.message.clone());
        }
    }
}

fn cron_for(config: &SchedulerConfig, kind: JobKind) -> &str {
    match kind {
        JobKind::ReminderPass => &config.reminder_cron,
        JobKind::PendingDrain => &config.pending_drain_cron,
        JobKind::DpdSweep => &config.dpd_sweep_cron,
    }
}
