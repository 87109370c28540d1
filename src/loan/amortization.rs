//! Fixed-payment (annuity) amortization and installment schedule generation

use chrono::{DateTime, Months, Utc};
use uuid::Uuid;

use super::model::{InstallmentStatus, LoanInstallment};

/// Fixed monthly payment for a loan.
///
/// `r = rate / 100 / 12`. A zero rate splits the principal evenly with
/// truncating division; otherwise the annuity formula
/// `P * r * (1 + r)^n / ((1 + r)^n - 1)` is rounded half away from zero.
/// Every ledger value downstream depends on this exact rounding.
pub fn monthly_payment(principal: i64, annual_rate_percent: f64, term_months: i32) -> i64 {
    if term_months <= 0 {
        return principal;
    }

    let monthly_rate = annual_rate_percent / 100.0 / 12.0;
    if monthly_rate == 0.0 {
        return principal / i64::from(term_months);
    }

    let growth = (1.0 + monthly_rate).powi(term_months);
    let payment = principal as f64 * monthly_rate * growth / (growth - 1.0);

    payment.round() as i64
}

/// Due date of installment `number` (1-based) for a loan disbursed at `disbursed_at`.
///
/// Calendar-month arithmetic: the day of month is clamped when the target
/// month is shorter (Jan 31 + 1 month = Feb 28/29).
pub fn installment_due_date(disbursed_at: DateTime<Utc>, number: u32) -> Option<DateTime<Utc>> {
    disbursed_at.checked_add_months(Months::new(number))
}

/// Build the full installment schedule of a freshly disbursed loan.
///
/// Produces exactly `term` rows numbered `1..=term`, all pending and unpaid,
/// each owing `monthly_payment`.
pub fn generate_installments(
    loan_id: Uuid,
    monthly_payment: i64,
    term: i32,
    disbursed_at: DateTime<Utc>,
) -> Option<Vec<LoanInstallment>> {
    let term = u32::try_from(term).ok()?;

    (1..=term)
        .map(|number| {
            let due_date = installment_due_date(disbursed_at, number)?;
            Some(LoanInstallment {
                id: Uuid::new_v4(),
                loan_id,
                number: number as i32,
                due_date,
                amount_due: monthly_payment,
                amount_paid: 0,
                status: InstallmentStatus::Pending,
                paid_at: None,
                days_past_due: 0,
                created_at: disbursed_at,
                updated_at: disbursed_at,
            })
        })
        .collect()
}
