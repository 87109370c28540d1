//! The three recurring jobs, as plain async functions over `now`

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::calendar::LocalCalendar;
use crate::error::{ServiceError, ServiceResult};
use crate::loan::DpdRecalculator;
use crate::notification::{
    DrainReport, NotificationDispatcher, ReminderMatcher, ScheduleNotificationRequest,
    ScheduleOutcome,
};
use crate::store::NotificationStore;

/// Reminders created by the daily pass go out on the next drain tick or
/// shortly after, never inside the pass itself.
const REMINDER_SEND_DELAY_SECONDS: i64 = 60;

/// Job identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ReminderPass,
    PendingDrain,
    DpdSweep,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::ReminderPass, JobKind::PendingDrain, JobKind::DpdSweep];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::ReminderPass => "reminder_pass",
            JobKind::PendingDrain => "pending_drain",
            JobKind::DpdSweep => "dpd_sweep",
        }
    }
}

/// Counts from the daily reminder pass
#[derive(Debug, Serialize, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPassReport {
    pub matched: usize,
    pub scheduled: usize,
    pub already_scheduled: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

/// What one job run did
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    ReminderPass(ReminderPassReport),
    PendingDrain(DrainReport),
    DpdSweep { affected: u64 },
}

impl JobReport {
    pub fn summary(&self) -> String {
        match self {
            JobReport::ReminderPass(r) => format!(
                "{} matched, {} scheduled, {} already scheduled, {} rate limited, {} failed",
                r.matched, r.scheduled, r.already_scheduled, r.rate_limited, r.failed
            ),
            JobReport::PendingDrain(r) => format!(
                "{} attempted, {} sent, {} failed, {} skipped",
                r.attempted, r.sent, r.failed, r.skipped
            ),
            JobReport::DpdSweep { affected } => format!("{} installments updated", affected),
        }
    }
}

/// Services the jobs run against
#[derive(Clone)]
pub struct ReminderJobs {
    templates: Arc<dyn NotificationStore>,
    matcher: ReminderMatcher,
    dispatcher: NotificationDispatcher,
    dpd: DpdRecalculator,
    calendar: LocalCalendar,
}

impl ReminderJobs {
    pub fn new(
        templates: Arc<dyn NotificationStore>,
        matcher: ReminderMatcher,
        dispatcher: NotificationDispatcher,
        dpd: DpdRecalculator,
        calendar: LocalCalendar,
    ) -> Self {
        Self {
            templates,
            matcher,
            dispatcher,
            dpd,
            calendar,
        }
    }

    pub async fn run(&self, kind: JobKind, now: DateTime<Utc>) -> ServiceResult<JobReport> {
        match kind {
            JobKind::ReminderPass => self.run_reminder_pass(now).await.map(JobReport::ReminderPass),
            JobKind::PendingDrain => self.run_pending_drain(now).await.map(JobReport::PendingDrain),
            JobKind::DpdSweep => self
                .run_dpd_sweep(now)
                .await
                .map(|affected| JobReport::DpdSweep { affected }),
        }
    }

    /// Match today's reminders and schedule each one.
    ///
    /// Rerunning on the same local day schedules nothing new.
    pub async fn run_reminder_pass(&self, now: DateTime<Utc>) -> ServiceResult<ReminderPassReport> {
        let today = self.calendar.today(now);
        let templates = self.templates.active_templates().await?;
        let reminders = self.matcher.find_due_reminders(today, &templates).await;

        let mut report = ReminderPassReport {
            matched: reminders.len(),
            ..Default::default()
        };
        let scheduled_for = now + Duration::seconds(REMINDER_SEND_DELAY_SECONDS);

        for reminder in reminders {
            let request = ScheduleNotificationRequest {
                installment_id: reminder.installment_id,
                template_id: reminder.template_id,
                channel: reminder.channel,
                recipient: reminder.recipient,
                scheduled_for,
            };

            match self.dispatcher.schedule(request, now).await {
                Ok(ScheduleOutcome::Scheduled(_)) => report.scheduled += 1,
                Ok(ScheduleOutcome::AlreadyScheduled(_)) => report.already_scheduled += 1,
                Err(ServiceError::RateLimited(message)) => {
                    report.rate_limited += 1;
                    tracing::info!(
                        installment_id = %reminder.installment_id,
                        contract_number = %reminder.contract_number,
                        %message,
                        "Reminder rate limited"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        installment_id = %reminder.installment_id,
                        template_id = %reminder.template_id,
                        error = %e,
                        "Failed to schedule reminder"
                    );
                }
            }
        }

        tracing::info!(
            %today,
            matched = report.matched,
            scheduled = report.scheduled,
            already_scheduled = report.already_scheduled,
            rate_limited = report.rate_limited,
            failed = report.failed,
            "Reminder pass finished"
        );

        Ok(report)
    }

    pub async fn run_pending_drain(&self, now: DateTime<Utc>) -> ServiceResult<DrainReport> {
        self.dispatcher.drain_pending(now).await
    }

    pub async fn run_dpd_sweep(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        self.dpd.recalculate(now).await
    }
}
