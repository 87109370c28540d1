//! Loans, their installment schedules and the DPD sweep

pub mod amortization;
pub mod dpd;
pub mod model;
pub mod service;

pub use amortization::{generate_installments, installment_due_date, monthly_payment};
pub use dpd::DpdRecalculator;
pub use model::*;
pub use service::LoanService;
