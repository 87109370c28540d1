//! In-process store with the same conditional semantics as the Postgres one

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    days_past_due, settle, CustomerDirectory, LoanStore, LoanTerms, NotificationStore,
    PaymentPosting, StoreError, StoreResult,
};
use crate::customer::CustomerRecord;
use crate::loan::{
    InstallmentStatus, ListLoansQuery, Loan, LoanInstallment, LoanStatus, PaymentOutcome,
};
use crate::notification::{
    Channel, InstallmentContext, NotificationLog, NotificationStatus, NotificationTemplate,
};

#[derive(Default)]
struct Tables {
    customers: HashMap<Uuid, CustomerRecord>,
    loans: HashMap<Uuid, Loan>,
    installments: HashMap<Uuid, LoanInstallment>,
    templates: HashMap<Uuid, NotificationTemplate>,
    logs: HashMap<Uuid, NotificationLog>,
}

impl Tables {
    fn context(&self, installment: &LoanInstallment) -> Option<InstallmentContext> {
        let loan = self.loans.get(&installment.loan_id)?;
        Some(InstallmentContext {
            installment: installment.clone(),
            contract_number: loan.contract_number.clone(),
            customer_id: loan.customer_id,
            loan_status: loan.status,
        })
    }
}

/// Store backed by hash maps behind one lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_customer(&self, customer: CustomerRecord) {
        self.tables
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn add_template(&self, template: NotificationTemplate) {
        self.tables
            .write()
            .await
            .templates
            .insert(template.id, template);
    }

    /// Every log, oldest first
    pub async fn all_logs(&self) -> Vec<NotificationLog> {
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables.logs.values().cloned().collect();
        logs.sort_by_key(|log| (log.created_at, log.id));
        logs
    }

    /// Overwrite an installment row, for arranging fixtures
    pub async fn put_installment(&self, installment: LoanInstallment) {
        self.tables
            .write()
            .await
            .installments
            .insert(installment.id, installment);
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan> {
        let mut tables = self.tables.write().await;
        if tables
            .loans
            .values()
            .any(|existing| existing.contract_number == loan.contract_number)
        {
            return Err(StoreError::Duplicate(format!(
                "contract number {} already exists",
                loan.contract_number
            )));
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(loan.clone())
    }

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>> {
        Ok(self.tables.read().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, query: &ListLoansQuery) -> StoreResult<(Vec<Loan>, i64)> {
        let tables = self.tables.read().await;
        let mut loans: Vec<Loan> = tables
            .loans
            .values()
            .filter(|loan| query.customer_id.map_or(true, |id| loan.customer_id == id))
            .filter(|loan| query.status.map_or(true, |status| loan.status == status))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = loans.len() as i64;
        let page = loans
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect();

        Ok((page, total))
    }

    async fn count_open_loans(&self, customer_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .loans
            .values()
            .filter(|loan| loan.customer_id == customer_id && loan.status.is_open())
            .count();
        Ok(count as i64)
    }

    async fn count_loans_created_in_year(&self, year: i32) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .loans
            .values()
            .filter(|loan| loan.created_at.year() == year)
            .count();
        Ok(count as i64)
    }

    async fn update_loan_terms(
        &self,
        id: Uuid,
        terms: &LoanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>> {
        let mut tables = self.tables.write().await;
        let Some(loan) = tables.loans.get_mut(&id) else {
            return Ok(None);
        };
        if loan.status.terms_locked() {
            return Ok(None);
        }

        loan.amount = terms.amount;
        loan.interest_rate = terms.interest_rate;
        loan.term = terms.term;
        loan.monthly_payment = terms.monthly_payment;
        loan.status = terms.status;
        loan.due_date = terms.due_date;
        loan.updated_at = now;

        Ok(Some(loan.clone()))
    }

    async fn transition_loan(
        &self,
        id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Loan>> {
        let mut tables = self.tables.write().await;
        match tables.loans.get_mut(&id) {
            Some(loan) if loan.status == from => {
                loan.status = to;
                loan.updated_at = now;
                Ok(Some(loan.clone()))
            }
            _ => Ok(None),
        }
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

        let mut tables = self.tables.write().await;
        let loan = match tables.loans.get_mut(&id) {
            Some(loan) if loan.status == LoanStatus::Approved => {
                loan.status = LoanStatus::Disbursed;
                loan.disbursed_at = Some(disbursed_at);
                loan.due_date = final_due;
                loan.updated_at = disbursed_at;
                loan.clone()
            }
            _ => return Ok(None),
        };

        for installment in installments {
            tables
                .installments
                .insert(installment.id, installment.clone());
        }

        Ok(Some(loan))
    }

    async fn list_installments(&self, loan_id: Uuid) -> StoreResult<Vec<LoanInstallment>> {
        let tables = self.tables.read().await;
        let mut installments: Vec<LoanInstallment> = tables
            .installments
            .values()
            .filter(|installment| installment.loan_id == loan_id)
            .cloned()
            .collect();
        installments.sort_by_key(|installment| installment.number);
        Ok(installments)
    }

    async fn get_installment(&self, id: Uuid) -> StoreResult<Option<LoanInstallment>> {
        Ok(self.tables.read().await.installments.get(&id).cloned())
    }

    async fn apply_payment(&self, payment: PaymentPosting) -> StoreResult<Option<PaymentOutcome>> {
        let mut tables = self.tables.write().await;

        let installment = match tables.installments.get_mut(&payment.installment_id) {
            Some(installment) if !installment.is_paid() => {
                let (amount_paid, status) = settle(installment, payment.amount);
                installment.amount_paid = amount_paid;
                installment.status = status;
                if status == InstallmentStatus::Paid {
                    installment.paid_at = Some(payment.paid_at);
                    installment.days_past_due = 0;
                }
                installment.updated_at = payment.recorded_at;
                installment.clone()
            }
            _ => return Ok(None),
        };

        let mut loan_completed = false;
        if installment.is_paid() {
            let all_paid = tables
                .installments
                .values()
                .filter(|other| other.loan_id == installment.loan_id)
                .all(LoanInstallment::is_paid);
            if all_paid {
                if let Some(loan) = tables.loans.get_mut(&installment.loan_id) {
                    if matches!(loan.status, LoanStatus::Disbursed | LoanStatus::Active) {
                        loan.status = LoanStatus::Completed;
                        loan.updated_at = payment.recorded_at;
                        loan_completed = true;
                    }
                }
            }
        }

        Ok(Some(PaymentOutcome {
            installment,
            loan_completed,
        }))
    }

    async fn recalculate_days_past_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut affected = 0;
        for installment in tables.installments.values_mut() {
            if installment.is_paid() || installment.due_date >= now {
                continue;
            }
            installment.days_past_due = days_past_due(installment.due_date, now);
            if installment.status == InstallmentStatus::Pending {
                installment.status = InstallmentStatus::Overdue;
            }
            installment.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn overdue_installments(&self, now: DateTime<Utc>) -> StoreResult<Vec<LoanInstallment>> {
        let tables = self.tables.read().await;
        let mut installments: Vec<LoanInstallment> = tables
            .installments
            .values()
            .filter(|installment| !installment.is_paid() && installment.due_date < now)
            .cloned()
            .collect();
        installments.sort_by_key(|installment| (installment.due_date, installment.number));
        Ok(installments)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn active_templates(&self) -> StoreResult<Vec<NotificationTemplate>> {
        let tables = self.tables.read().await;
        let mut templates: Vec<NotificationTemplate> = tables
            .templates
            .values()
            .filter(|template| template.active)
            .cloned()
            .collect();
        templates.sort_by_key(|template| (template.created_at, template.id));
        Ok(templates)
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<NotificationTemplate>> {
        Ok(self.tables.read().await.templates.get(&id).cloned())
    }

    async fn installments_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<InstallmentContext>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<InstallmentContext> = tables
            .installments
            .values()
            .filter(|i| !i.is_paid() && i.due_date >= start && i.due_date < end)
            .filter_map(|i| tables.context(i))
            .filter(|ctx| ctx.loan_status == LoanStatus::Active)
            .collect();
        rows.sort_by_key(|ctx| (ctx.installment.due_date, ctx.installment.id));
        Ok(rows)
    }

    async fn installment_context(
        &self,
        installment_id: Uuid,
    ) -> StoreResult<Option<InstallmentContext>> {
        let tables = self.tables.read().await;
        Ok(tables
            .installments
            .get(&installment_id)
            .and_then(|installment| tables.context(installment)))
    }

    async fn find_log(
        &self,
        installment_id: Uuid,
        template_id: Uuid,
        scheduled_on: NaiveDate,
    ) -> StoreResult<Option<NotificationLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .values()
            .find(|log| {
                log.installment_id == installment_id
                    && log.template_id == template_id
                    && log.scheduled_on == scheduled_on
            })
            .cloned())
    }

    async fn count_whatsapp_sent_since(
        &self,
        contract_number: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .logs
            .values()
            .filter(|log| {
                log.channel == Channel::WhatsApp
                    && log.status == NotificationStatus::Sent
                    && log.sent_at.map_or(false, |sent_at| sent_at > since)
            })
            .filter(|log| {
                tables
                    .installments
                    .get(&log.installment_id)
                    .and_then(|installment| tables.loans.get(&installment.loan_id))
                    .map_or(false, |loan| loan.contract_number == contract_number)
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_log(&self, log: &NotificationLog) -> StoreResult<Option<NotificationLog>> {
        let mut tables = self.tables.write().await;
        let taken = tables.logs.values().any(|existing| {
            existing.installment_id == log.installment_id
                && existing.template_id == log.template_id
                && existing.scheduled_on == log.scheduled_on
        });
        if taken {
            return Ok(None);
        }
        tables.logs.insert(log.id, log.clone());
        Ok(Some(log.clone()))
    }

    async fn get_log(&self, id: Uuid) -> StoreResult<Option<NotificationLog>> {
        Ok(self.tables.read().await.logs.get(&id).cloned())
    }

    async fn claim_attempt(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationLog>> {
        let mut tables = self.tables.write().await;
        match tables.logs.get_mut(&id) {
            Some(log)
                if matches!(
                    log.status,
                    NotificationStatus::Pending | NotificationStatus::Failed
                ) && log.attempts < max_attempts
                    && !log.is_leased(now) =>
            {
                log.attempts += 1;
                log.last_attempt_at = Some(now);
                log.locked_until = Some(lease_until);
                log.updated_at = now;
                Ok(Some(log.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(log) = tables.logs.get_mut(&id) {
            log.status = status;
            log.error_message = error_message.map(str::to_string);
            if sent_at.is_some() {
                log.sent_at = sent_at;
            }
            log.locked_until = None;
            log.updated_at = now;
        }
        Ok(())
    }

    async fn due_logs(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<Vec<NotificationLog>> {
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables
            .logs
            .values()
            .filter(|log| {
                matches!(
                    log.status,
                    NotificationStatus::Pending | NotificationStatus::Failed
                ) && log.attempts < max_attempts
                    && log.scheduled_for <= now
                    && !log.is_leased(now)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.scheduled_for, log.created_at, log.id));
        Ok(logs)
    }

    async fn logs_for_installment(
        &self,
        installment_id: Uuid,
    ) -> StoreResult<Vec<NotificationLog>> {
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables
            .logs
            .values()
            .filter(|log| log.installment_id == installment_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }
}

#[async_trait]
impl CustomerDirectory for MemoryStore {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<CustomerRecord>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn installment(loan_id: Uuid, due_date: DateTime<Utc>) -> LoanInstallment {
        LoanInstallment {
            id: Uuid::new_v4(),
            loan_id,
            number: 1,
            due_date,
            amount_due: 1_000,
            amount_paid: 0,
            status: InstallmentStatus::Pending,
            paid_at: None,
            days_past_due: 0,
            created_at: due_date,
            updated_at: due_date,
        }
    }

    #[tokio::test]
    async fn test_dpd_floors_whole_days() {
        let store = MemoryStore::new();
        let due = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let row = installment(Uuid::new_v4(), due);
        store.put_installment(row.clone()).await;

        let now = Utc.with_ymd_and_hms(2024, 5, 4, 11, 59, 59).unwrap();
        assert_eq!(store.recalculate_days_past_due(now).await.unwrap(), 1);

        let updated = store.get_installment(row.id).await.unwrap().unwrap();
        assert_eq!(updated.days_past_due, 2);
        assert_eq!(updated.status, InstallmentStatus::Overdue);
    }

    #[tokio::test]
    async fn test_claim_attempt_holds_lease_and_respects_cap() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap();
        let log = NotificationLog {
            id: Uuid::new_v4(),
            installment_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            channel: Channel::Email,
            recipient: "a@b.c".into(),
            subject: String::new(),
            body: "hi".into(),
            status: NotificationStatus::Pending,
            scheduled_for: now,
            scheduled_on: now.date_naive(),
            attempts: 1,
            last_attempt_at: None,
            locked_until: None,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_log(&log).await.unwrap();

        let lease = now + chrono::Duration::seconds(60);
        let claimed = store.claim_attempt(log.id, 3, now, lease).await.unwrap().unwrap();
        assert_eq!(claimed.locked_until, Some(lease));
        // Held by the first sender
        assert!(store.claim_attempt(log.id, 3, now, lease).await.unwrap().is_none());
        assert!(store.due_logs(now, 3).await.unwrap().is_empty());

        store
            .record_outcome(log.id, NotificationStatus::Failed, Some("503"), None, now)
            .await
            .unwrap();
        assert_eq!(store.get_log(log.id).await.unwrap().unwrap().locked_until, None);

        // Released: the third and last attempt
        let claimed = store.claim_attempt(log.id, 3, now, lease).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 3);
        store
            .record_outcome(log.id, NotificationStatus::Failed, Some("503"), None, now)
            .await
            .unwrap();
        assert!(store.claim_attempt(log.id, 3, now, lease).await.unwrap().is_none());
        // Same idempotence key is refused
        assert!(store
            .insert_log(&NotificationLog {
                id: Uuid::new_v4(),
                ..log
            })
            .await
            .unwrap()
            .is_none());
    }
}
