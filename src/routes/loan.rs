//! Loan and installment route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan).get(list_loans))
        .route("/api/loans/:id", get(get_loan).put(update_loan))
        .route("/api/loans/:id/approve", post(approve_loan))
        .route("/api/loans/:id/disburse", post(disburse_loan))
        .route("/api/loans/:id/activate", post(activate_loan))
        .route("/api/installments/payments", post(pay_installment))
        .route("/api/installments/overdue", get(list_overdue_installments))
}
