//! Notification templates, logs and dispatch DTOs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::loan::{LoanInstallment, LoanStatus};

/// Sends stop after this many attempts; the log then stays failed for inspection
pub const MAX_SEND_ATTEMPTS: i32 = 3;

/// Delivery channel
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "notification_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    #[serde(alias = "wa")]
    WhatsApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

/// When a template fires, relative to the installment due date
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "notification_schedule", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOffset {
    BeforeD7,
    BeforeD3,
    BeforeD1,
    AfterD1,
    AfterD3,
    AfterD7,
}

impl ScheduleOffset {
    pub const ALL: [ScheduleOffset; 6] = [
        ScheduleOffset::BeforeD7,
        ScheduleOffset::BeforeD3,
        ScheduleOffset::BeforeD1,
        ScheduleOffset::AfterD1,
        ScheduleOffset::AfterD3,
        ScheduleOffset::AfterD7,
    ];

    /// Signed days relative to the due date; negative is before
    pub fn days(self) -> i64 {
        match self {
            ScheduleOffset::BeforeD7 => -7,
            ScheduleOffset::BeforeD3 => -3,
            ScheduleOffset::BeforeD1 => -1,
            ScheduleOffset::AfterD1 => 1,
            ScheduleOffset::AfterD3 => 3,
            ScheduleOffset::AfterD7 => 7,
        }
    }

    pub fn from_days(days: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|offset| offset.days() == days)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleOffset::BeforeD7 => "before_d7",
            ScheduleOffset::BeforeD3 => "before_d3",
            ScheduleOffset::BeforeD1 => "before_d1",
            ScheduleOffset::AfterD1 => "after_d1",
            ScheduleOffset::AfterD3 => "after_d3",
            ScheduleOffset::AfterD7 => "after_d7",
        }
    }
}

/// Reminder template, maintained by the admin configuration screens
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub name: String,
    pub channel: Channel,
    pub subject: String, // empty for WhatsApp
    pub body: String,
    pub schedule: ScheduleOffset,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Notification log status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

/// One rendered reminder and its delivery bookkeeping
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct NotificationLog {
    pub id: Uuid,
    pub installment_id: Uuid,
    pub template_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub scheduled_for: DateTime<Utc>,
    /// Local calendar day the log was created for; part of the idempotence key
    pub scheduled_on: NaiveDate,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set while a sender holds the log; cleared once the outcome is recorded
    pub locked_until: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationLog {
    /// Whether a drain may still try this log
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            NotificationStatus::Pending | NotificationStatus::Failed
        ) && self.attempts < MAX_SEND_ATTEMPTS
    }

    /// Whether a sender still holds this log at `now`
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Unpaid installment of an active loan, with what a reminder needs to address it
#[derive(Debug, Serialize, sqlx::FromRow, Clone, PartialEq)]
pub struct InstallmentContext {
    #[sqlx(flatten)]
    pub installment: LoanInstallment,
    pub contract_number: String,
    pub customer_id: Uuid,
    pub loan_status: LoanStatus,
}

/// A template that fires today for an installment, with its resolved recipient
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DueReminder {
    pub installment_id: Uuid,
    pub template_id: Uuid,
    pub channel: Channel,
    pub schedule: ScheduleOffset,
    pub recipient: String,
    pub customer_name: String,
    pub contract_number: String,
}

/// Request to schedule one reminder
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleNotificationRequest {
    pub installment_id: Uuid,
    pub template_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub scheduled_for: DateTime<Utc>,
}

/// What `schedule` did
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "outcome", content = "log", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled(NotificationLog),
    /// A log already exists for this installment, template and day
    AlreadyScheduled(NotificationLog),
}

impl ScheduleOutcome {
    pub fn log(&self) -> &NotificationLog {
        match self {
            ScheduleOutcome::Scheduled(log) | ScheduleOutcome::AlreadyScheduled(log) => log,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled(_))
    }
}

/// Ad-hoc message used to check channel credentials
#[derive(Debug, Deserialize, Clone)]
pub struct TestNotificationRequest {
    pub channel: Channel,
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    pub body: String,
}

/// Counts from one pending-queue drain
#[derive(Debug, Serialize, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}
