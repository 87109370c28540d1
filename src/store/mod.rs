//! Persistence seam for the loan and reminder subsystem
//!
//! Services depend on these traits only. `PgStore` is the production
//! implementation; `MemoryStore` keeps everything in process and backs the
//! test suite and offline runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::customer::CustomerRecord;
use crate::loan::{
    InstallmentStatus, ListLoansQuery, Loan, LoanInstallment, LoanStatus, PaymentOutcome,
};
use crate::notification::{
    InstallmentContext, NotificationLog, NotificationStatus, NotificationTemplate,
};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unique constraint violated: {0}")]
    Duplicate(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(db_err.message().to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// New terms for a loan that has not been disbursed
#[derive(Debug, Clone)]
pub struct LoanTerms {
    pub amount: i64,
    pub interest_rate: f64,
    pub term: i32,
    pub monthly_payment: i64,
    pub status: LoanStatus,
    pub due_date: DateTime<Utc>,
}

/// Payment to post against an installment
#[derive(Debug, Clone, Copy)]
pub struct PaymentPosting {
    pub installment_id: Uuid,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// Loans and their installment schedules
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan>;

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>>;

    async fn list_loans(&self, query: &ListLoansQuery) -> StoreResult<(Vec<Loan>, i64)>;

    /// Loans of a customer in pending, approved, disbursed or active
    async fn count_open_loans(&self, customer_id: Uuid) -> StoreResult<i64>;

    async fn count_loans_created_in_year(&self, year: i32) -> StoreResult<i64>;

    /// Replace the terms of a loan whose terms are not locked.
    /// `None` when the loan is missing or has been disbursed meanwhile.
    async fn update_loan_terms(
        &self,
        id: Uuid,
        terms: &LoanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>>;

    /// Conditional status change; `None` when the loan is not in `from`
    async fn transition_loan(
        &self,
        id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>>;

    /// Mark an approved loan disbursed and insert its schedule, all or nothing.
    /// `None` when the loan is no longer approved.
    async fn disburse_loan(
        &self,
        id: Uuid,
        disbursed_at: DateTime<Utc>,
        installments: &[LoanInstallment],
    ) -> StoreResult<Option<Loan>>;

    async fn list_installments(&self, loan_id: Uuid) -> StoreResult<Vec<LoanInstallment>>;

    async fn get_installment(&self, id: Uuid) -> StoreResult<Option<LoanInstallment>>;

    /// Add a payment to an unpaid installment and complete the loan when it was
    /// the last one, in one transaction. `None` when the installment is paid.
    async fn apply_payment(&self, payment: PaymentPosting) -> StoreResult<Option<PaymentOutcome>>;

    /// Overwrite days past due for every unpaid installment due before `now`,
    /// moving pending ones to overdue. Returns the number of rows touched.
    async fn recalculate_days_past_due(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn overdue_installments(&self, now: DateTime<Utc>) -> StoreResult<Vec<LoanInstallment>>;
}

/// Templates and notification logs
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn active_templates(&self) -> StoreResult<Vec<NotificationTemplate>>;

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<NotificationTemplate>>;

    /// Unpaid installments of active loans due within `[start, end)`
    async fn installments_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<InstallmentContext>>;

    async fn installment_context(&self, installment_id: Uuid)
        -> StoreResult<Option<InstallmentContext>>;

    /// Log for the idempotence key, if any
    async fn find_log(
        &self,
        installment_id: Uuid,
        template_id: Uuid,
        scheduled_on: NaiveDate,
    ) -> StoreResult<Option<NotificationLog>>;

    /// WhatsApp messages for a contract that went out after `since`
    async fn count_whatsapp_sent_since(
        &self,
        contract_number: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Insert unless the idempotence key is taken; `None` when it is
    async fn insert_log(&self, log: &NotificationLog) -> StoreResult<Option<NotificationLog>>;

    async fn get_log(&self, id: Uuid) -> StoreResult<Option<NotificationLog>>;

    /// Atomically count one more attempt on a pending or failed log below
    /// `max_attempts` and hold it until `lease_until` or the next
    /// `record_outcome`. `None` when the log is not eligible or another
    /// sender holds it.
    async fn claim_attempt(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationLog>>;

    /// Store the delivery result and release the lease
    async fn record_outcome(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Unleased pending or failed logs below the attempt cap whose time has
    /// come, oldest first
    async fn due_logs(&self, now: DateTime<Utc>, max_attempts: i32)
        -> StoreResult<Vec<NotificationLog>>;

    async fn logs_for_installment(&self, installment_id: Uuid)
        -> StoreResult<Vec<NotificationLog>>;
}

/// Read-only view of customer data owned by the customer module
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<CustomerRecord>>;
}

/// Whether a payment of `amount` on top of `installment` settles it.
/// Saturates; callers reject amounts that would not fit.
pub(crate) fn settle(installment: &LoanInstallment, amount: i64) -> (i64, InstallmentStatus) {
    let amount_paid = installment.amount_paid.saturating_add(amount);
    let status = if amount_paid >= installment.amount_due {
        InstallmentStatus::Paid
    } else {
        InstallmentStatus::Partial
    };
    (amount_paid, status)
}

/// Whole days elapsed since `due_date`, floored
pub(crate) fn days_past_due(due_date: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let seconds = (now - due_date).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    i32::try_from(seconds / 86_400).unwrap_or(i32::MAX)
}
