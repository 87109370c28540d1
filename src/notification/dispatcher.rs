//! Notification dispatcher
//!
//! Turns a (installment, template) pair into a rendered, logged and
//! eventually delivered message. Every log row is created at most once per
//! installment, template and local calendar day; delivery is attempted at
//! most `MAX_SEND_ATTEMPTS` times across all drains.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::model::{
    Channel, DrainReport, InstallmentContext, NotificationLog, NotificationStatus,
    ScheduleNotificationRequest, ScheduleOutcome, TestNotificationRequest, MAX_SEND_ATTEMPTS,
};
use super::provider::{ProviderError, ProviderRegistry};
use super::template::{render, TemplateContext};
use crate::calendar::LocalCalendar;
use crate::config::ReminderConfig;
use crate::customer::CustomerContacts;
use crate::error::{ServiceError, ServiceResult};
use crate::loan::LoanStatus;
use crate::store::NotificationStore;

/// One WhatsApp message per contract inside this window
const WHATSAPP_WINDOW_HOURS: i64 = 24;

/// Extra hold on a claimed log beyond the provider timeout
const LEASE_GRACE_SECONDS: i64 = 30;

/// What a single `send` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed,
    /// The installment was paid or the loan left active before delivery
    Skipped,
    /// Already sent, out of attempts, or claimed by a concurrent sender
    NotEligible,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    customers: CustomerContacts,
    providers: ProviderRegistry,
    calendar: LocalCalendar,
    reminders: ReminderConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        customers: CustomerContacts,
        providers: ProviderRegistry,
        calendar: LocalCalendar,
        reminders: ReminderConfig,
    ) -> Self {
        Self {
            store,
            customers,
            providers,
            calendar,
            reminders,
        }
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.reminders.provider_timeout_seconds)
    }

    /// How long a claimed log stays out of every other sender's reach
    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hold = chrono::Duration::from_std(self.send_timeout())
            .unwrap_or_else(|_| chrono::Duration::days(1))
            + chrono::Duration::seconds(LEASE_GRACE_SECONDS);
        now.checked_add_signed(hold).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Render and log one reminder, sending it right away when it is due.
    pub async fn schedule(
        &self,
        request: ScheduleNotificationRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<ScheduleOutcome> {
        let context = self
            .store
            .installment_context(request.installment_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("installment {} not found", request.installment_id))
            })?;

        let template = self
            .store
            .get_template(request.template_id)
            .await?
            .filter(|template| template.active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "active template {} not found",
                    request.template_id
                ))
            })?;

        if template.channel != request.channel {
            return Err(ServiceError::Validation(format!(
                "template {} is a {} template",
                template.id,
                template.channel.as_str()
            )));
        }
        if request.recipient.trim().is_empty() {
            return Err(ServiceError::Validation("recipient is required".to_string()));
        }

        let scheduled_on = self.calendar.today(now);
        if let Some(existing) = self
            .store
            .find_log(context.installment.id, template.id, scheduled_on)
            .await?
        {
            tracing::debug!(
                notification_id = %existing.id,
                installment_id = %context.installment.id,
                template_id = %template.id,
                "Reminder already scheduled today"
            );
            return Ok(ScheduleOutcome::AlreadyScheduled(existing));
        }

        if request.channel == Channel::WhatsApp {
            self.check_whatsapp_rate_limit(&context, now).await?;
        }

        let customer = self
            .customers
            .contact(context.customer_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("customer {} not found", context.customer_id))
            })?;

        let values =
            TemplateContext::for_installment(&context, &customer.name, &self.calendar, &self.reminders);
        let subject = render(&template.subject, &values)?;
        let body = render(&template.body, &values)?;

        let log = NotificationLog {
            id: Uuid::new_v4(),
            installment_id: context.installment.id,
            template_id: template.id,
            channel: request.channel,
            recipient: request.recipient,
            subject,
            body,
            status: NotificationStatus::Pending,
            scheduled_for: request.scheduled_for,
            scheduled_on,
            attempts: 0,
            last_attempt_at: None,
            locked_until: None,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };

        let Some(log) = self.store.insert_log(&log).await? else {
            // Lost the race on the idempotence key
            let existing = self
                .store
                .find_log(context.installment.id, template.id, scheduled_on)
                .await?
                .ok_or_else(|| {
                    ServiceError::Conflict("notification log was removed concurrently".to_string())
                })?;
            return Ok(ScheduleOutcome::AlreadyScheduled(existing));
        };

        tracing::info!(
            notification_id = %log.id,
            installment_id = %log.installment_id,
            template_id = %log.template_id,
            channel = log.channel.as_str(),
            scheduled_for = %log.scheduled_for,
            "Notification scheduled"
        );

        if log.scheduled_for > now {
            return Ok(ScheduleOutcome::Scheduled(log));
        }

        if let Err(e) = self.send(log.id, now).await {
            tracing::error!(notification_id = %log.id, error = %e, "Immediate send failed");
        }

        let log = self.store.get_log(log.id).await?.unwrap_or(log);
        Ok(ScheduleOutcome::Scheduled(log))
    }

    async fn check_whatsapp_rate_limit(
        &self,
        context: &InstallmentContext,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let since = now - chrono::Duration::hours(WHATSAPP_WINDOW_HOURS);
        let recent = self
            .store
            .count_whatsapp_sent_since(&context.contract_number, since)
            .await?;

        if recent > 0 {
            tracing::info!(
                contract_number = %context.contract_number,
                "WhatsApp rate limit hit"
            );
            return Err(ServiceError::RateLimited(format!(
                "only one WhatsApp message per {} hours for contract {}",
                WHATSAPP_WINDOW_HOURS, context.contract_number
            )));
        }

        Ok(())
    }

    /// Make one delivery attempt for a log.
    ///
    /// Provider failures land on the log as `failed`; only store errors are
    /// returned. No retry loop here, the next drain picks failed logs up.
    pub async fn send(&self, log_id: Uuid, now: DateTime<Utc>) -> ServiceResult<SendOutcome> {
        let log = self
            .store
            .get_log(log_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("notification {} not found", log_id)))?;

        if !log.is_retryable() {
            return Ok(SendOutcome::NotEligible);
        }

        if let Some(reason) = self.stale_reason(&log).await? {
            self.store
                .record_outcome(log.id, NotificationStatus::Skipped, Some(reason), None, now)
                .await?;
            tracing::info!(notification_id = %log.id, reason, "Notification skipped");
            return Ok(SendOutcome::Skipped);
        }

        let Some(log) = self
            .store
            .claim_attempt(log.id, MAX_SEND_ATTEMPTS, now, self.lease_until(now))
            .await?
        else {
            tracing::debug!(notification_id = %log_id, "Notification held by another sender");
            return Ok(SendOutcome::NotEligible);
        };

        match self.deliver(log.channel, &log.recipient, &log.subject, &log.body).await {
            Ok(()) => {
                self.store
                    .record_outcome(log.id, NotificationStatus::Sent, None, Some(now), now)
                    .await?;
                tracing::info!(
                    notification_id = %log.id,
                    channel = log.channel.as_str(),
                    attempt = log.attempts,
                    "Notification sent"
                );
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .record_outcome(log.id, NotificationStatus::Failed, Some(&message), None, now)
                    .await?;
                tracing::warn!(
                    notification_id = %log.id,
                    channel = log.channel.as_str(),
                    attempt = log.attempts,
                    error = %message,
                    "Notification send failed"
                );
                Ok(SendOutcome::Failed)
            }
        }
    }

    async fn stale_reason(&self, log: &NotificationLog) -> ServiceResult<Option<&'static str>> {
        let reason = match self.store.installment_context(log.installment_id).await? {
            None => Some("installment no longer exists"),
            Some(context) if context.installment.is_paid() => Some("installment already paid"),
            Some(context) if context.loan_status != LoanStatus::Active => Some("loan is not active"),
            Some(_) => None,
        };
        Ok(reason)
    }

    async fn deliver(
        &self,
        channel: Channel,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ProviderError> {
        let provider = self
            .providers
            .get(channel)
            .ok_or(ProviderError::NotConfigured(channel.as_str()))?;

        let timeout = self.send_timeout();
        match tokio::time::timeout(timeout, provider.send(recipient, subject, body)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
        }
    }

    /// Attempt every due pending or failed log, oldest first.
    ///
    /// Logs another drain is already delivering are left alone and not
    /// counted as attempted.
    pub async fn drain_pending(&self, now: DateTime<Utc>) -> ServiceResult<DrainReport> {
        let logs = self.store.due_logs(now, MAX_SEND_ATTEMPTS).await?;
        let mut report = DrainReport::default();

        for log in logs {
            match self.send(log.id, now).await {
                Ok(SendOutcome::Sent) => {
                    report.attempted += 1;
                    report.sent += 1;
                }
                Ok(SendOutcome::Failed) => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Ok(SendOutcome::Skipped) => {
                    report.attempted += 1;
                    report.skipped += 1;
                }
                Ok(SendOutcome::NotEligible) => {}
                Err(e) => {
                    report.attempted += 1;
                    report.failed += 1;
                    tracing::error!(notification_id = %log.id, error = %e, "Failed to process notification");
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Pending notifications drained"
        );

        Ok(report)
    }

    /// Send straight through a provider without logging, to check credentials
    pub async fn send_test(&self, request: TestNotificationRequest) -> ServiceResult<()> {
        if request.recipient.trim().is_empty() {
            return Err(ServiceError::Validation("recipient is required".to_string()));
        }

        self.deliver(request.channel, &request.recipient, &request.subject, &request.body)
            .await?;

        tracing::info!(channel = request.channel.as_str(), "Test notification sent");
        Ok(())
    }

    /// The queue the next drain would work on
    pub async fn pending_notifications(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<NotificationLog>> {
        Ok(self.store.due_logs(now, MAX_SEND_ATTEMPTS).await?)
    }

    pub async fn logs_for_installment(
        &self,
        installment_id: Uuid,
    ) -> ServiceResult<Vec<NotificationLog>> {
        Ok(self.store.logs_for_installment(installment_id).await?)
    }
}
