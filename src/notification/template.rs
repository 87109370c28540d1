//! Reminder template rendering
//!
//! Templates reference values as `{{.name}}`; whitespace inside the braces is
//! ignored. Each value answers to its Indonesian key and an English alias.

use crate::calendar::LocalCalendar;
use crate::config::ReminderConfig;
use crate::error::{ServiceError, ServiceResult};

use super::model::InstallmentContext;

/// Values available to a reminder template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub customer_name: String,
    pub contract_number: String,
    /// `DD/MM/YYYY` in the scheduler zone
    pub due_date: String,
    /// Formatted with [`format_currency`]
    pub amount: String,
    pub payment_link: String,
    pub support_contact: String,
}

impl TemplateContext {
    pub fn for_installment(
        context: &InstallmentContext,
        customer_name: &str,
        calendar: &LocalCalendar,
        reminders: &ReminderConfig,
    ) -> Self {
        Self {
            customer_name: customer_name.to_string(),
            contract_number: context.contract_number.clone(),
            due_date: calendar.format_date(context.installment.due_date),
            amount: format_currency(context.installment.amount_due),
            payment_link: format!("{}{}", reminders.payment_link_base, context.contract_number),
            support_contact: reminders.support_contact.clone(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        let value = match key {
            "nama" | "customer_name" => &self.customer_name,
            "no_kontrak" | "contract_number" => &self.contract_number,
            "jatuh_tempo" | "due_date" => &self.due_date,
            "jumlah" | "amount" => &self.amount,
            "link_pembayaran" | "payment_link" => &self.payment_link,
            "kontak_cs" | "support_contact" => &self.support_contact,
            _ => return None,
        };
        Some(value)
    }
}

/// Substitute every placeholder in `template`.
///
/// An unknown or unterminated placeholder fails the whole render.
pub fn render(template: &str, context: &TemplateContext) -> ServiceResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| {
            ServiceError::Render(format!(
                "unterminated placeholder at byte {}",
                template.len() - rest.len() + start
            ))
        })?;

        let inner = after_open[..end].trim();
        let key = inner.strip_prefix('.').ok_or_else(|| {
            ServiceError::Render(format!("placeholder '{}' must start with '.'", inner))
        })?;
        let value = context
            .lookup(key.trim())
            .ok_or_else(|| ServiceError::Render(format!("unknown placeholder '{}'", key)))?;

        out.push_str(value);
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Rupiah with `.` thousands separators: `Rp 1.066.667`
pub fn format_currency(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    if amount < 0 {
        format!("Rp -{}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}
