//! Loan and installment API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::loan::{
    CreateLoanRequest, InstallmentPaymentRequest, ListLoansQuery, Loan, LoanInstallment,
    LoanPage, LoanService, LoanWithInstallments, PaymentOutcome, UpdateLoanRequest,
};
use crate::models::ApiResponse;

/// POST /api/loans
pub async fn create_loan(
    State(service): State<Arc<LoanService>>,
    Json(request): Json<CreateLoanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Loan>>), ApiError> {
    let loan = service.create_loan(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

/// GET /api/loans
pub async fn list_loans(
    State(service): State<Arc<LoanService>>,
    Query(query): Query<ListLoansQuery>,
) -> Result<Json<ApiResponse<LoanPage>>, ApiError> {
    let page = service.list_loans(query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /api/loans/:id
pub async fn get_loan(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanWithInstallments>>, ApiError> {
    let loan = service.get_loan(id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// PUT /api/loans/:id
pub async fn update_loan(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLoanRequest>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = service.update_loan(id, request, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/approve
pub async fn approve_loan(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = service.approve_loan(id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok_with_message(loan, "Loan approved")))
}

/// POST /api/loans/:id/disburse
pub async fn disburse_loan(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanWithInstallments>>, ApiError> {
    let loan = service.disburse_loan(id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok_with_message(loan, "Loan disbursed")))
}

/// POST /api/loans/:id/activate
pub async fn activate_loan(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = service.activate_loan(id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok_with_message(loan, "Loan activated")))
}

/// POST /api/installments/payments
pub async fn pay_installment(
    State(service): State<Arc<LoanService>>,
    Json(request): Json<InstallmentPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentOutcome>>, ApiError> {
    let outcome = service.pay_installment(request, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// GET /api/installments/overdue
pub async fn list_overdue_installments(
    State(service): State<Arc<LoanService>>,
) -> Result<Json<ApiResponse<Vec<LoanInstallment>>>, ApiError> {
    let installments = service.list_overdue_installments(Utc::now()).await?;
    Ok(Json(ApiResponse::ok(installments)))
}
