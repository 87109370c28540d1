//! Loan service layer - Business logic for the loan lifecycle

use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, Utc};
use uuid::Uuid;
use validator::Validate;

use super::amortization::{generate_installments, monthly_payment};
use super::model::{
    CreateLoanRequest, InstallmentPaymentRequest, ListLoansQuery, Loan, LoanInstallment,
    LoanPage, LoanStatus, LoanWithInstallments, PaymentOutcome, UpdateLoanRequest,
};
use crate::customer::CustomerContacts;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{LoanStore, LoanTerms, PaymentPosting, StoreError};

// Concurrent creations can race for the same sequence number
const CONTRACT_NUMBER_ATTEMPTS: usize = 3;

/// Loan service for managing the loan lifecycle
#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn LoanStore>,
    customers: CustomerContacts,
}

impl LoanService {
    pub fn new(store: Arc<dyn LoanStore>, customers: CustomerContacts) -> Self {
        Self { store, customers }
    }

    /// Create a pending loan for a customer with no other open loan
    pub async fn create_loan(
        &self,
        request: CreateLoanRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Loan> {
        request.check()?;

        if !self.customers.exists(request.customer_id).await? {
            return Err(ServiceError::NotFound(format!(
                "customer {} not found",
                request.customer_id
            )));
        }

        if self.store.count_open_loans(request.customer_id).await? > 0 {
            return Err(ServiceError::Conflict(
                "customer already has an active loan".to_string(),
            ));
        }

        let payment = monthly_payment(request.amount, request.interest_rate, request.term);
        let due_date = add_term(now, request.term)?;

        let mut last_error = None;
        for _ in 0..CONTRACT_NUMBER_ATTEMPTS {
            let loan = Loan {
                id: Uuid::new_v4(),
                customer_id: request.customer_id,
                contract_number: self.next_contract_number(now).await?,
                amount: request.amount,
                interest_rate: request.interest_rate,
                term: request.term,
                monthly_payment: payment,
                status: LoanStatus::Pending,
                disbursed_at: None,
                due_date,
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_loan(&loan).await {
                Ok(loan) => {
                    tracing::info!(
                        loan_id = %loan.id,
                        contract_number = %loan.contract_number,
                        customer_id = %loan.customer_id,
                        monthly_payment = loan.monthly_payment,
                        "Loan created"
                    );
                    return Ok(loan);
                }
                Err(StoreError::Duplicate(message)) => {
                    tracing::warn!(contract_number = %loan.contract_number, "Contract number taken, retrying");
                    last_error = Some(message);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(last_error.unwrap_or_else(|| {
            "could not allocate a contract number".to_string()
        })))
    }

    /// Loan with its installment schedule
    pub async fn get_loan(&self, id: Uuid) -> ServiceResult<LoanWithInstallments> {
        let loan = self.require_loan(id).await?;
        let installments = self.store.list_installments(id).await?;
        Ok(LoanWithInstallments { loan, installments })
    }

    pub async fn list_loans(&self, query: ListLoansQuery) -> ServiceResult<LoanPage> {
        let (loans, total) = self.store.list_loans(&query).await?;
        Ok(LoanPage {
            loans,
            total,
            page: query.page(),
            limit: query.limit(),
        })
    }

    /// Change amount, rate, term or status of a loan that has not been disbursed
    pub async fn update_loan(
        &self,
        id: Uuid,
        request: UpdateLoanRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Loan> {
        request.check()?;

        let loan = self.require_loan(id).await?;
        if loan.status.terms_locked() {
            return Err(ServiceError::Conflict(format!(
                "cannot update a {} loan",
                loan.status.as_str()
            )));
        }

        let status = request.status.unwrap_or(loan.status);
        if status.is_open()
            && !loan.status.is_open()
            && self.store.count_open_loans(loan.customer_id).await? > 0
        {
            return Err(ServiceError::Conflict(
                "customer already has an active loan".to_string(),
            ));
        }

        let terms = LoanTerms {
            amount: request.amount,
            interest_rate: request.interest_rate,
            term: request.term,
            monthly_payment: monthly_payment(request.amount, request.interest_rate, request.term),
            status,
            due_date: add_term(now, request.term)?,
        };

        let updated = self
            .store
            .update_loan_terms(id, &terms, now)
            .await?
            .ok_or_else(|| ServiceError::Conflict("loan was disbursed meanwhile".to_string()))?;

        tracing::info!(loan_id = %id, status = updated.status.as_str(), "Loan updated");
        Ok(updated)
    }

    pub async fn approve_loan(&self, id: Uuid, now: DateTime<Utc>) -> ServiceResult<Loan> {
        self.transition(id, LoanStatus::Pending, LoanStatus::Approved, now)
            .await
    }

    /// Disburse an approved loan and generate its installments, all or nothing
    pub async fn disburse_loan(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<LoanWithInstallments> {
        let loan = self.require_loan(id).await?;
        if loan.status != LoanStatus::Approved {
            return Err(ServiceError::Conflict(format!(
                "only approved loans can be disbursed, loan is {}",
                loan.status.as_str()
            )));
        }

        let installments = generate_installments(loan.id, loan.monthly_payment, loan.term, now)
            .ok_or_else(|| {
                ServiceError::Validation("installment schedule is out of range".to_string())
            })?;

        let loan = self
            .store
            .disburse_loan(id, now, &installments)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("loan is no longer in approved status".to_string())
            })?;

        tracing::info!(
            loan_id = %loan.id,
            contract_number = %loan.contract_number,
            installments = installments.len(),
            "Loan disbursed"
        );

        Ok(LoanWithInstallments { loan, installments })
    }

    /// Disbursed loans become active, which makes them eligible for reminders
    pub async fn activate_loan(&self, id: Uuid, now: DateTime<Utc>) -> ServiceResult<Loan> {
        self.transition(id, LoanStatus::Disbursed, LoanStatus::Active, now)
            .await
    }

    /// Post a payment against one installment
    pub async fn pay_installment(
        &self,
        request: InstallmentPaymentRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<PaymentOutcome> {
        request.validate()?;

        let installment = self
            .store
            .get_installment(request.installment_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("installment {} not found", request.installment_id))
            })?;

        if installment.is_paid() {
            return Err(ServiceError::Conflict("installment is already paid".to_string()));
        }
        if installment.amount_paid.checked_add(request.amount).is_none() {
            return Err(ServiceError::Validation(
                "payment amount exceeds what an installment can record".to_string(),
            ));
        }

        let outcome = self
            .store
            .apply_payment(PaymentPosting {
                installment_id: request.installment_id,
                amount: request.amount,
                paid_at: request.payment_date,
                recorded_at: now,
            })
            .await?
            .ok_or_else(|| ServiceError::Conflict("installment is already paid".to_string()))?;

        tracing::info!(
            installment_id = %outcome.installment.id,
            loan_id = %outcome.installment.loan_id,
            amount = request.amount,
            amount_paid = outcome.installment.amount_paid,
            status = ?outcome.installment.status,
            "Installment payment recorded"
        );
        if outcome.loan_completed {
            tracing::info!(loan_id = %outcome.installment.loan_id, "Loan completed");
        }

        Ok(outcome)
    }

    /// Unpaid installments past their due date
    pub async fn list_overdue_installments(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<LoanInstallment>> {
        Ok(self.store.overdue_installments(now).await?)
    }

    async fn require_loan(&self, id: Uuid) -> ServiceResult<Loan> {
        self.store
            .get_loan(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("loan {} not found", id)))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Loan> {
        let loan = self.require_loan(id).await?;
        if loan.status != from {
            return Err(ServiceError::Conflict(format!(
                "loan is {}, expected {}",
                loan.status.as_str(),
                from.as_str()
            )));
        }

        let loan = self
            .store
            .transition_loan(id, from, to, now)
            .await?
            .ok_or_else(|| ServiceError::Conflict("loan status changed meanwhile".to_string()))?;

        tracing::info!(loan_id = %id, from = from.as_str(), to = to.as_str(), "Loan status changed");
        Ok(loan)
    }

    async fn next_contract_number(&self, now: DateTime<Utc>) -> ServiceResult<String> {
        let year = now.year();
        let count = self.store.count_loans_created_in_year(year).await?;
        Ok(format_contract_number(year, count + 1))
    }
}

/// `KOP-<year>-<4-digit sequence>`
pub fn format_contract_number(year: i32, sequence: i64) -> String {
    format!("KOP-{}-{:04}", year, sequence)
}

fn add_term(start: DateTime<Utc>, term: i32) -> ServiceResult<DateTime<Utc>> {
    u32::try_from(term)
        .ok()
        .and_then(|months| start.checked_add_months(Months::new(months)))
        .ok_or_else(|| ServiceError::Validation("loan term is out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_number_format() {
        assert_eq!(format_contract_number(2024, 1), "KOP-2024-0001");
        assert_eq!(format_contract_number(2025, 123), "KOP-2025-0123");
        assert_eq!(format_contract_number(2025, 12345), "KOP-2025-12345");
    }

    #[test]
    fn test_add_term_uses_calendar_months() {
        let start = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 31, 0, 0, 0).unwrap();
        let due = add_term(start, 1).unwrap();
        assert_eq!(due.day(), 29);
        assert!(add_term(start, -1).is_err());
    }
}
