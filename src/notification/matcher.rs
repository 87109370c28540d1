//! Selects which installments a template fires for on a given day

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use super::model::{DueReminder, InstallmentContext, NotificationTemplate};
use crate::calendar::LocalCalendar;
use crate::customer::{CustomerContact, CustomerContacts};
use crate::error::{ServiceError, ServiceResult};
use crate::store::NotificationStore;

/// Read-only matcher; the idempotence guard belongs to the dispatcher
#[derive(Clone)]
pub struct ReminderMatcher {
    store: Arc<dyn NotificationStore>,
    customers: CustomerContacts,
    calendar: LocalCalendar,
}

impl ReminderMatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        customers: CustomerContacts,
        calendar: LocalCalendar,
    ) -> Self {
        Self {
            store,
            customers,
            calendar,
        }
    }

    /// Due date a template targets on `today`: the day for which
    /// `due_date + offset == today`
    pub fn target_due_date(today: NaiveDate, template: &NotificationTemplate) -> Option<NaiveDate> {
        LocalCalendar::shift(today, -template.schedule.days())
    }

    /// Every (installment, template) pair that should be reminded today.
    ///
    /// Inactive templates are ignored. A failing template is logged and the
    /// rest still run; a missing recipient only skips that one match.
    pub async fn find_due_reminders(
        &self,
        today: NaiveDate,
        templates: &[NotificationTemplate],
    ) -> Vec<DueReminder> {
        let mut contacts: HashMap<Uuid, Option<CustomerContact>> = HashMap::new();
        let mut reminders = Vec::new();

        for template in templates.iter().filter(|t| t.active) {
            match self.match_template(today, template, &mut contacts).await {
                Ok(mut found) => {
                    tracing::debug!(
                        template_id = %template.id,
                        schedule = template.schedule.as_str(),
                        matches = found.len(),
                        "Template matched"
                    );
                    reminders.append(&mut found);
                }
                Err(e) => {
                    tracing::error!(
                        template_id = %template.id,
                        template = %template.name,
                        error = %e,
                        "Failed to match template"
                    );
                }
            }
        }

        reminders
    }

    async fn match_template(
        &self,
        today: NaiveDate,
        template: &NotificationTemplate,
        contacts: &mut HashMap<Uuid, Option<CustomerContact>>,
    ) -> ServiceResult<Vec<DueReminder>> {
        let target = Self::target_due_date(today, template).ok_or_else(|| {
            ServiceError::Validation(format!("target date out of range for {}", today))
        })?;
        let (start, end) = self.calendar.day_bounds(target);

        let installments = self.store.installments_due_between(start, end).await?;

        let mut reminders = Vec::with_capacity(installments.len());
        for context in installments {
            let contact = match contacts.get(&context.customer_id) {
                Some(contact) => contact.clone(),
                None => {
                    let contact = self.customers.contact(context.customer_id).await?;
                    contacts.insert(context.customer_id, contact.clone());
                    contact
                }
            };

            if let Some(reminder) = build_reminder(template, &context, contact.as_ref()) {
                reminders.push(reminder);
            }
        }

        Ok(reminders)
    }
}

fn build_reminder(
    template: &NotificationTemplate,
    context: &InstallmentContext,
    contact: Option<&CustomerContact>,
) -> Option<DueReminder> {
    let Some(contact) = contact else {
        tracing::warn!(
            installment_id = %context.installment.id,
            customer_id = %context.customer_id,
            "Customer not found, skipping reminder"
        );
        return None;
    };

    let recipient = contact.address_for(template.channel);
    if recipient.is_empty() {
        tracing::warn!(
            installment_id = %context.installment.id,
            customer_id = %context.customer_id,
            channel = template.channel.as_str(),
            "No recipient for channel, skipping reminder"
        );
        return None;
    }

    Some(DueReminder {
        installment_id: context.installment.id,
        template_id: template.id,
        channel: template.channel,
        schedule: template.schedule,
        recipient: recipient.to_string(),
        customer_name: contact.name.clone(),
        contract_number: context.contract_number.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::{Channel, ScheduleOffset};
    use chrono::{TimeZone, Utc};

    fn template(schedule: ScheduleOffset) -> NotificationTemplate {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        NotificationTemplate {
            id: Uuid::new_v4(),
            name: "t".into(),
            channel: Channel::Email,
            subject: String::new(),
            body: String::new(),
            schedule,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_target_due_date_direction() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        // Seven days before due: the installment is due a week from today
        assert_eq!(
            ReminderMatcher::target_due_date(today, &template(ScheduleOffset::BeforeD7)),
            NaiveDate::from_ymd_opt(2024, 3, 17)
        );
        // Three days after due: it fell due three days ago
        assert_eq!(
            ReminderMatcher::target_due_date(today, &template(ScheduleOffset::AfterD3)),
            NaiveDate::from_ymd_opt(2024, 3, 7)
        );
    }
}
