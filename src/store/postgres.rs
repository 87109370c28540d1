//! PostgreSQL store

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    CustomerDirectory, LoanStore, LoanTerms, NotificationStore, PaymentPosting, StoreResult,
};
use crate::customer::CustomerRecord;
use crate::loan::{ListLoansQuery, Loan, LoanInstallment, LoanStatus, PaymentOutcome};
use crate::notification::{
    InstallmentContext, NotificationLog, NotificationStatus, NotificationTemplate,
};

const CONTEXT_SELECT: &str = r#"
    SELECT i.*, l.contract_number, l.customer_id, l.status AS loan_status
    FROM loan_installments i
    JOIN loans l ON l.id = i.loan_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn push_loan_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ListLoansQuery) {
    if let Some(customer_id) = query.customer_id {
        builder.push(" AND customer_id = ");
        builder.push_bind(customer_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
}

fn year_bounds(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
    let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
    Some((start, end))
}

#[async_trait]
impl LoanStore for PgStore {
    async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (
                id, customer_id, contract_number, amount, interest_rate, term,
                monthly_payment, status, disbursed_at, due_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.customer_id)
        .bind(&loan.contract_number)
        .bind(loan.amount)
        .bind(loan.interest_rate)
        .bind(loan.term)
        .bind(loan.monthly_payment)
        .bind(loan.status)
        .bind(loan.disbursed_at)
        .bind(loan.due_date)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(loan)
    }

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(loan)
    }

    async fn list_loans(&self, query: &ListLoansQuery) -> StoreResult<(Vec<Loan>, i64)> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM loans WHERE 1=1");
        push_loan_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query_builder = QueryBuilder::new("SELECT * FROM loans WHERE 1=1");
        push_loan_filters(&mut query_builder, query);
        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(i64::from(query.limit()));
        query_builder.push(" OFFSET ");
        query_builder.push_bind(i64::from(query.offset()));

        let loans = query_builder
            .build_query_as::<Loan>()
            .fetch_all(&self.pool)
            .await?;

        Ok((loans, total))
    }

    async fn count_open_loans(&self, customer_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM loans
            WHERE customer_id = $1
              AND status IN ('pending', 'approved', 'disbursed', 'active')
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_loans_created_in_year(&self, year: i32) -> StoreResult<i64> {
        let Some((start, end)) = year_bounds(year) else {
            return Ok(0);
        };

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn update_loan_terms(
        &self,
        id: Uuid,
        terms: &LoanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET amount = $2, interest_rate = $3, term = $4, monthly_payment = $5,
                status = $6, due_date = $7, updated_at = $8
            WHERE id = $1 AND status NOT IN ('disbursed', 'active', 'completed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(terms.amount)
        .bind(terms.interest_rate)
        .bind(terms.term)
        .bind(terms.monthly_payment)
        .bind(terms.status)
        .bind(terms.due_date)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(loan)
    }

    async fn transition_loan(
        &self,
        id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(loan)
    }

    async fn disburse_loan(
        &self,
        id: Uuid,
        disbursed_at: DateTime<Utc>,
        installments: &[LoanInstallment],
    ) -> StoreResult<Option<Loan>> {
        let Some(final_due) = installments.iter().map(|i| i.due_date).max() else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;

        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'disbursed', disbursed_at = $2, due_date = $3, updated_at = $2
            WHERE id = $1 AND status = 'approved'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(disbursed_at)
        .bind(final_due)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(loan) = loan else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO loan_installments (id, loan_id, number, due_date, amount_due, \
             amount_paid, status, paid_at, days_past_due, created_at, updated_at) ",
        );
        insert.push_values(installments, |mut row, installment| {
            row.push_bind(installment.id)
                .push_bind(installment.loan_id)
                .push_bind(installment.number)
                .push_bind(installment.due_date)
                .push_bind(installment.amount_due)
                .push_bind(installment.amount_paid)
                .push_bind(installment.status)
                .push_bind(installment.paid_at)
                .push_bind(installment.days_past_due)
                .push_bind(installment.created_at)
                .push_bind(installment.updated_at);
        });
        insert.build().execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(Some(loan))
    }

    async fn list_installments(&self, loan_id: Uuid) -> StoreResult<Vec<LoanInstallment>> {
        let installments = sqlx::query_as::<_, LoanInstallment>(
            "SELECT * FROM loan_installments WHERE loan_id = $1 ORDER BY number ASC",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(installments)
    }

    async fn get_installment(&self, id: Uuid) -> StoreResult<Option<LoanInstallment>> {
        let installment =
            sqlx::query_as::<_, LoanInstallment>("SELECT * FROM loan_installments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(installment)
    }

    async fn apply_payment(&self, payment: PaymentPosting) -> StoreResult<Option<PaymentOutcome>> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes a concurrent DPD sweep or second payment harmless
        let installment = sqlx::query_as::<_, LoanInstallment>(
            r#"
            UPDATE loan_installments
            SET amount_paid = amount_paid + $2,
                status = CASE WHEN amount_paid + $2 >= amount_due
                              THEN 'paid'::installment_status
                              ELSE 'partial'::installment_status END,
                paid_at = CASE WHEN amount_paid + $2 >= amount_due THEN $3 ELSE paid_at END,
                days_past_due = CASE WHEN amount_paid + $2 >= amount_due THEN 0 ELSE days_past_due END,
                updated_at = $4
            WHERE id = $1 AND status != 'paid'
            RETURNING *
            "#,
        )
        .bind(payment.installment_id)
        .bind(payment.amount)
        .bind(payment.paid_at)
        .bind(payment.recorded_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(installment) = installment else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut loan_completed = false;
        if installment.is_paid() {
            let unpaid: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM loan_installments WHERE loan_id = $1 AND status != 'paid'",
            )
            .bind(installment.loan_id)
            .fetch_one(&mut *tx)
            .await?;

            if unpaid == 0 {
                let result = sqlx::query(
                    r#"
                    UPDATE loans SET status = 'completed', updated_at = $2
                    WHERE id = $1 AND status IN ('disbursed', 'active')
                    "#,
                )
                .bind(installment.loan_id)
                .bind(payment.recorded_at)
                .execute(&mut *tx)
                .await?;
                loan_completed = result.rows_affected() > 0;
            }
        }

        tx.commit().await?;

        Ok(Some(PaymentOutcome {
            installment,
            loan_completed,
        }))
    }

    async fn recalculate_days_past_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE loan_installments
            SET days_past_due = FLOOR(EXTRACT(EPOCH FROM ($1::timestamptz - due_date)) / 86400)::int,
                status = CASE WHEN status = 'pending'
                              THEN 'overdue'::installment_status
                              ELSE status END,
                updated_at = $1
            WHERE due_date < $1 AND status != 'paid'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn overdue_installments(&self, now: DateTime<Utc>) -> StoreResult<Vec<LoanInstallment>> {
        let installments = sqlx::query_as::<_, LoanInstallment>(
            r#"
            SELECT * FROM loan_installments
            WHERE due_date < $1 AND status != 'paid'
            ORDER BY due_date ASC, number ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(installments)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn active_templates(&self) -> StoreResult<Vec<NotificationTemplate>> {
        let templates = sqlx::query_as::<_, NotificationTemplate>(
            "SELECT * FROM notification_templates WHERE active = TRUE ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(templates)
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<NotificationTemplate>> {
        let template = sqlx::query_as::<_, NotificationTemplate>(
            "SELECT * FROM notification_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    async fn installments_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<InstallmentContext>> {
        let sql = format!(
            "{CONTEXT_SELECT} WHERE i.due_date >= $1 AND i.due_date < $2 \
             AND i.status != 'paid' AND l.status = 'active' \
             ORDER BY i.due_date ASC"
        );
        let rows = sqlx::query_as::<_, InstallmentContext>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn installment_context(
        &self,
        installment_id: Uuid,
    ) -> StoreResult<Option<InstallmentContext>> {
        let sql = format!("{CONTEXT_SELECT} WHERE i.id = $1");
        let row = sqlx::query_as::<_, InstallmentContext>(&sql)
            .bind(installment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_log(
        &self,
        installment_id: Uuid,
        template_id: Uuid,
        scheduled_on: NaiveDate,
    ) -> StoreResult<Option<NotificationLog>> {
        let log = sqlx::query_as::<_, NotificationLog>(
            r#"
            SELECT * FROM notification_logs
            WHERE installment_id = $1 AND template_id = $2 AND scheduled_on = $3
            "#,
        )
        .bind(installment_id)
        .bind(template_id)
        .bind(scheduled_on)
        .fetch_optional(&self.pool)
        .await?;

        Ok(log)
    }

    async fn count_whatsapp_sent_since(
        &self,
        contract_number: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notification_logs n
            JOIN loan_installments i ON i.id = n.installment_id
            JOIN loans l ON l.id = i.loan_id
            WHERE l.contract_number = $1
              AND n.channel = 'whatsapp'
              AND n.status = 'sent'
              AND n.sent_at > $2
            "#,
        )
        .bind(contract_number)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert_log(&self, log: &NotificationLog) -> StoreResult<Option<NotificationLog>> {
        let inserted = sqlx::query_as::<_, NotificationLog>(
            r#"
            INSERT INTO notification_logs (
                id, installment_id, template_id, channel, recipient, subject, body,
                status, scheduled_for, scheduled_on, attempts, last_attempt_at,
                locked_until, error_message, sent_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (installment_id, template_id, scheduled_on) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(log.id)
        .bind(log.installment_id)
        .bind(log.template_id)
        .bind(log.channel)
        .bind(&log.recipient)
        .bind(&log.subject)
        .bind(&log.body)
        .bind(log.status)
        .bind(log.scheduled_for)
        .bind(log.scheduled_on)
        .bind(log.attempts)
        .bind(log.last_attempt_at)
        .bind(log.locked_until)
        .bind(&log.error_message)
        .bind(log.sent_at)
        .bind(log.created_at)
        .bind(log.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn get_log(&self, id: Uuid) -> StoreResult<Option<NotificationLog>> {
        let log =
            sqlx::query_as::<_, NotificationLog>("SELECT * FROM notification_logs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(log)
    }

    async fn claim_attempt(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationLog>> {
        let log = sqlx::query_as::<_, NotificationLog>(
            r#"
            UPDATE notification_logs
            SET attempts = attempts + 1, last_attempt_at = $3, locked_until = $4, updated_at = $3
            WHERE id = $1
              AND status IN ('pending', 'failed')
              AND attempts < $2
              AND (locked_until IS NULL OR locked_until <= $3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .bind(now)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(log)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_logs
            SET status = $2, error_message = $3, sent_at = COALESCE($4, sent_at),
                locked_until = NULL, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(sent_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_logs(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<Vec<NotificationLog>> {
        let logs = sqlx::query_as::<_, NotificationLog>(
            r#"
            SELECT * FROM notification_logs
            WHERE status IN ('pending', 'failed')
              AND attempts < $2
              AND scheduled_for <= $1
              AND (locked_until IS NULL OR locked_until <= $1)
            ORDER BY scheduled_for ASC, created_at ASC
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn logs_for_installment(
        &self,
        installment_id: Uuid,
    ) -> StoreResult<Vec<NotificationLog>> {
        let logs = sqlx::query_as::<_, NotificationLog>(
            "SELECT * FROM notification_logs WHERE installment_id = $1 ORDER BY created_at DESC",
        )
        .bind(installment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}

#[async_trait]
impl CustomerDirectory for PgStore {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<CustomerRecord>> {
        let customer = sqlx::query_as::<_, CustomerRecord>(
            "SELECT id, name, email, phone FROM customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }
}
