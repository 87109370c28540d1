//! Loan and installment models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ServiceError, ServiceResult};

/// Longest tenor the cooperative offers, in months
pub const MAX_TERM_MONTHS: i32 = 60;

/// Loan status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    Active,
    Completed,
    Defaulted,
    Cancelled,
}

impl LoanStatus {
    /// Statuses that count towards the one-open-loan-per-customer rule
    pub const OPEN: [LoanStatus; 4] = [
        LoanStatus::Pending,
        LoanStatus::Approved,
        LoanStatus::Disbursed,
        LoanStatus::Active,
    ];

    pub fn is_open(self) -> bool {
        Self::OPEN.contains(&self)
    }

    /// Terms are frozen once money has moved
    pub fn terms_locked(self) -> bool {
        matches!(
            self,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Cancelled => "cancelled",
        }
    }
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Loan {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub contract_number: String, // KOP-<year>-<sequence>
    pub amount: i64,             // principal, minor units
    pub interest_rate: f64,      // annual percent
    pub term: i32,               // months
    pub monthly_payment: i64,
    pub status: LoanStatus,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Installment status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "installment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

/// One scheduled repayment of a disbursed loan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct LoanInstallment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub number: i32,
    pub due_date: DateTime<Utc>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub days_past_due: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanInstallment {
    pub fn is_paid(&self) -> bool {
        self.status == InstallmentStatus::Paid
    }

    pub fn outstanding(&self) -> i64 {
        (self.amount_due - self.amount_paid).max(0)
    }
}

/// Loan together with its installment schedule
#[derive(Debug, Serialize, Clone)]
pub struct LoanWithInstallments {
    #[serde(flatten)]
    pub loan: Loan,
    pub installments: Vec<LoanInstallment>,
}

/// Request to create a new loan
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateLoanRequest {
    pub customer_id: Uuid,
    #[validate(range(
        min = 1,
        max = 1000000000000000,
        message = "loan amount must be between 1 and 1000000000000000"
    ))]
    pub amount: i64,
    #[validate(range(max = 100.0, message = "interest rate must be between 0 and 100"))]
    pub interest_rate: f64,
    #[validate(range(min = 1, max = 60, message = "loan term must be between 1 and 60 months"))]
    pub term: i32,
}

impl CreateLoanRequest {
    pub fn check(&self) -> ServiceResult<()> {
        self.validate()?;
        check_interest_rate(self.interest_rate)
    }
}

/// Request to change the terms of a loan that has not been disbursed yet
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateLoanRequest {
    #[validate(range(
        min = 1,
        max = 1000000000000000,
        message = "loan amount must be between 1 and 1000000000000000"
    ))]
    pub amount: i64,
    #[validate(range(max = 100.0, message = "interest rate must be between 0 and 100"))]
    pub interest_rate: f64,
    #[validate(range(min = 1, max = 60, message = "loan term must be between 1 and 60 months"))]
    pub term: i32,
    /// Only pending, approved and cancelled may be set here
    pub status: Option<LoanStatus>,
}

impl UpdateLoanRequest {
    pub fn check(&self) -> ServiceResult<()> {
        self.validate()?;
        check_interest_rate(self.interest_rate)?;
        match self.status {
            None
            | Some(LoanStatus::Pending)
            | Some(LoanStatus::Approved)
            | Some(LoanStatus::Cancelled) => Ok(()),
            Some(other) => Err(ServiceError::Validation(format!(
                "status '{}' cannot be set through an update",
                other.as_str()
            ))),
        }
    }
}

// The derive only knows inclusive bounds; zero is rejected here.
fn check_interest_rate(rate: f64) -> ServiceResult<()> {
    if !rate.is_finite() || rate <= 0.0 || rate > 100.0 {
        return Err(ServiceError::Validation(
            "interest rate must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

/// Request to post a payment against an installment
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct InstallmentPaymentRequest {
    pub installment_id: Uuid,
    #[validate(range(
        min = 1,
        max = 1000000000000000,
        message = "payment amount must be between 1 and 1000000000000000"
    ))]
    pub amount: i64,
    pub payment_date: DateTime<Utc>,
}

/// Result of posting a payment
#[derive(Debug, Serialize, Clone)]
pub struct PaymentOutcome {
    pub installment: LoanInstallment,
    /// True when this payment settled the last open installment
    pub loan_completed: bool,
}

/// Query for listing loans
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ListLoansQuery {
    pub customer_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListLoansQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        match self.limit {
            Some(limit) if (1..=100).contains(&limit) => limit,
            _ => 20,
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1) * self.limit()
    }
}

/// One page of loans
#[derive(Debug, Serialize, Clone)]
pub struct LoanPage {
    pub loans: Vec<Loan>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64, rate: f64, term: i32) -> CreateLoanRequest {
        CreateLoanRequest {
            customer_id: Uuid::new_v4(),
            amount,
            interest_rate: rate,
            term,
        }
    }

    #[test]
    fn test_create_request_bounds() {
        assert!(request(12_000_000, 12.0, 12).check().is_ok());
        assert!(request(0, 12.0, 12).check().is_err());
        assert!(request(1_000, 0.0, 12).check().is_err());
        assert!(request(1_000, 100.5, 12).check().is_err());
        assert!(request(1_000, 12.0, 0).check().is_err());
        assert!(request(1_000, 12.0, 61).check().is_err());
        assert!(request(1_000, 12.0, MAX_TERM_MONTHS).check().is_ok());
    }

    #[test]
    fn test_update_request_rejects_lifecycle_statuses() {
        let update = UpdateLoanRequest {
            amount: 1_000,
            interest_rate: 10.0,
            term: 6,
            status: Some(LoanStatus::Disbursed),
        };
        assert!(matches!(update.check(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_open_statuses() {
        assert!(LoanStatus::Pending.is_open());
        assert!(LoanStatus::Active.is_open());
        assert!(!LoanStatus::Completed.is_open());
        assert!(!LoanStatus::Cancelled.is_open());
    }

    #[test]
    fn test_list_query_defaults() {
        let query = ListLoansQuery {
            limit: Some(500),
            page: Some(0),
            ..Default::default()
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 20);
        assert_eq!(query.offset(), 0);

        let query = ListLoansQuery {
            limit: Some(10),
            page: Some(3),
            ..Default::default()
        };
        assert_eq!(query.offset(), 20);
    }
}
