//! Loan lifecycle tests against the in-memory store

mod common;

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Duration, Months};
    use uuid::Uuid;

    use koperasi_server::error::ServiceError;
    use koperasi_server::loan::{
        CreateLoanRequest, InstallmentPaymentRequest, InstallmentStatus, ListLoansQuery,
        LoanStatus, UpdateLoanRequest,
    };
    use koperasi_server::scheduler::JobKind;

    use crate::common::{at, Harness};

    fn loan_request(customer_id: Uuid) -> CreateLoanRequest {
        CreateLoanRequest {
            customer_id,
            amount: 12_000_000,
            interest_rate: 12.0,
            term: 12,
        }
    }

    #[tokio::test]
    async fn test_create_loan_assigns_contract_number_and_payment() {
        let harness = Harness::new();
        let customer = harness.add_customer("Budi Santoso", "budi@example.com", "081234567890").await;
        let now = at(2024, 1, 10, 3, 0);

        let loan = harness
            .state
            .loan_service
            .create_loan(loan_request(customer), now)
            .await
            .unwrap();

        assert_eq!(loan.contract_number, "KOP-2024-0001");
        assert_eq!(loan.monthly_payment, 1_066_185);
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.due_date, now + Months::new(12));
        assert!(loan.disbursed_at.is_none());
    }

    #[tokio::test]
    async fn test_create_loan_rejections() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Siti", "siti@example.com", "").await;
        let now = at(2024, 1, 10, 3, 0);

        let unknown = service.create_loan(loan_request(Uuid::new_v4()), now).await;
        assert!(matches!(unknown, Err(ServiceError::NotFound(_))));

        let mut invalid = loan_request(customer);
        invalid.term = 61;
        assert!(matches!(
            service.create_loan(invalid, now).await,
            Err(ServiceError::Validation(_))
        ));

        service.create_loan(loan_request(customer), now).await.unwrap();
        let second = service.create_loan(loan_request(customer), now).await;
        assert!(matches!(second, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_disbursement_generates_schedule() {
        let harness = Harness::new();
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let disbursed_at = at(2024, 1, 31, 3, 0);

        let active = harness.active_loan(customer, disbursed_at).await;
        let installments = &active.installments;

        assert_eq!(active.loan.status, LoanStatus::Active);
        assert_eq!(active.loan.disbursed_at, Some(disbursed_at));
        assert_eq!(installments.len(), 12);

        for (index, installment) in installments.iter().enumerate() {
            assert_eq!(installment.number, index as i32 + 1);
            assert_eq!(installment.amount_due, 1_066_185);
            assert_eq!(installment.amount_paid, 0);
            assert_eq!(installment.status, InstallmentStatus::Pending);
        }
        for pair in installments.windows(2) {
            assert!(pair[0].due_date < pair[1].due_date);
        }

        // Jan 31 clamps to the end of shorter months
        assert_eq!(installments[0].due_date.day(), 29);
        assert_eq!(installments[11].due_date, disbursed_at + Months::new(12));
        assert_eq!(active.loan.due_date, installments[11].due_date);

        let stored = harness.state.loan_service.get_loan(active.loan.id).await.unwrap();
        assert_eq!(stored.installments, active.installments);
    }

    #[tokio::test]
    async fn test_status_transitions_are_guarded() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let now = at(2024, 1, 10, 3, 0);

        let loan = service.create_loan(loan_request(customer), now).await.unwrap();
        assert!(matches!(
            service.disburse_loan(loan.id, now).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            service.activate_loan(loan.id, now).await,
            Err(ServiceError::Conflict(_))
        ));

        service.approve_loan(loan.id, now).await.unwrap();
        service.disburse_loan(loan.id, now).await.unwrap();
        assert!(matches!(
            service.disburse_loan(loan.id, now).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            service.approve_loan(Uuid::new_v4(), now).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_loan_before_and_after_disbursement() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let now = at(2024, 1, 10, 3, 0);

        let loan = service.create_loan(loan_request(customer), now).await.unwrap();
        let updated = service
            .update_loan(
                loan.id,
                UpdateLoanRequest {
                    amount: 6_000_000,
                    interest_rate: 12.0,
                    term: 6,
                    status: Some(LoanStatus::Approved),
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(updated.amount, 6_000_000);
        assert_eq!(updated.term, 6);
        assert_eq!(updated.status, LoanStatus::Approved);
        assert_eq!(updated.contract_number, loan.contract_number);
        assert!(updated.monthly_payment > 1_000_000);

        service.disburse_loan(loan.id, now).await.unwrap();
        let locked = service
            .update_loan(
                loan.id,
                UpdateLoanRequest {
                    amount: 1_000_000,
                    interest_rate: 10.0,
                    term: 3,
                    status: None,
                },
                now,
            )
            .await;
        assert!(matches!(locked, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_partial_payments_settle_exactly_at_threshold() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let active = harness.active_loan(customer, at(2024, 1, 10, 3, 0)).await;
        let first = &active.installments[0];
        let paid_on = at(2024, 2, 9, 5, 0);

        let payment = |amount| InstallmentPaymentRequest {
            installment_id: first.id,
            amount,
            payment_date: paid_on,
        };

        let outcome = service.pay_installment(payment(500_000), paid_on).await.unwrap();
        assert_eq!(outcome.installment.amount_paid, 500_000);
        assert_eq!(outcome.installment.status, InstallmentStatus::Partial);
        assert!(outcome.installment.paid_at.is_none());

        let outcome = service.pay_installment(payment(566_184), paid_on).await.unwrap();
        assert_eq!(outcome.installment.amount_paid, 1_066_184);
        assert_eq!(outcome.installment.status, InstallmentStatus::Partial);

        let outcome = service.pay_installment(payment(1), paid_on).await.unwrap();
        assert_eq!(outcome.installment.amount_paid, 1_066_185);
        assert_eq!(outcome.installment.status, InstallmentStatus::Paid);
        assert_eq!(outcome.installment.paid_at, Some(paid_on));
        assert!(!outcome.loan_completed);

        let again = service.pay_installment(payment(1), paid_on).await;
        assert!(matches!(again, Err(ServiceError::Conflict(_))));

        let missing = service
            .pay_installment(
                InstallmentPaymentRequest {
                    installment_id: Uuid::new_v4(),
                    amount: 1,
                    payment_date: paid_on,
                },
                paid_on,
            )
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oversized_payment_is_a_validation_error() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let active = harness.active_loan(customer, at(2024, 1, 10, 3, 0)).await;
        let first = &active.installments[0];
        let paid_on = at(2024, 2, 9, 5, 0);

        let payment = |amount| InstallmentPaymentRequest {
            installment_id: first.id,
            amount,
            payment_date: paid_on,
        };

        service.pay_installment(payment(1), paid_on).await.unwrap();
        let huge = service.pay_installment(payment(i64::MAX), paid_on).await;
        assert!(matches!(huge, Err(ServiceError::Validation(_))));

        let installment = service
            .get_loan(active.loan.id)
            .await
            .unwrap()
            .installments
            .into_iter()
            .find(|installment| installment.id == first.id)
            .unwrap();
        assert_eq!(installment.amount_paid, 1);
        assert_eq!(installment.status, InstallmentStatus::Partial);

        // The largest accepted amount settles it
        let outcome = service
            .pay_installment(payment(1_000_000_000_000_000), paid_on)
            .await
            .unwrap();
        assert_eq!(outcome.installment.status, InstallmentStatus::Paid);
    }

    #[tokio::test]
    async fn test_paying_every_installment_completes_the_loan() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let start = at(2024, 1, 10, 3, 0);
        let active = harness.active_loan(customer, start).await;

        let mut completed = Vec::new();
        for installment in &active.installments {
            let outcome = service
                .pay_installment(
                    InstallmentPaymentRequest {
                        installment_id: installment.id,
                        amount: installment.amount_due + 100,
                        payment_date: installment.due_date,
                    },
                    installment.due_date,
                )
                .await
                .unwrap();
            completed.push(outcome.loan_completed);
        }

        assert_eq!(completed.iter().filter(|done| **done).count(), 1);
        assert_eq!(completed.last(), Some(&true));

        let loan = service.get_loan(active.loan.id).await.unwrap().loan;
        assert_eq!(loan.status, LoanStatus::Completed);

        // A closed loan no longer blocks a new one
        let next = service
            .create_loan(loan_request(customer), at(2025, 2, 1, 3, 0))
            .await
            .unwrap();
        assert_eq!(next.contract_number, "KOP-2025-0001");
    }

    #[tokio::test]
    async fn test_dpd_sweep_is_idempotent() {
        let harness = Harness::new();
        let customer = harness.add_customer("Budi", "budi@example.com", "0812").await;
        let active = harness.active_loan(customer, at(2024, 1, 10, 3, 0)).await;
        let first_due = active.installments[0].due_date;
        let now = first_due + Duration::days(5) + Duration::hours(1);

        let dpd = harness.state.scheduler.execute(JobKind::DpdSweep, now).await;
        assert!(dpd.success);

        let after_first = harness
            .state
            .loan_service
            .get_loan(active.loan.id)
            .await
            .unwrap()
            .installments;
        assert_eq!(after_first[0].days_past_due, 5);
        assert_eq!(after_first[0].status, InstallmentStatus::Overdue);
        assert_eq!(after_first[1].days_past_due, 0);
        assert_eq!(after_first[1].status, InstallmentStatus::Pending);

        harness.state.scheduler.execute(JobKind::DpdSweep, now).await;
        let after_second = harness
            .state
            .loan_service
            .get_loan(active.loan.id)
            .await
            .unwrap()
            .installments;
        assert_eq!(after_first, after_second);

        let overdue = harness
            .state
            .loan_service
            .list_overdue_installments(now)
            .await
            .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, active.installments[0].id);
    }

    #[tokio::test]
    async fn test_list_loans_filters_and_pages() {
        let harness = Harness::new();
        let service = &harness.state.loan_service;
        let now = at(2024, 3, 1, 3, 0);

        for i in 0..3 {
            let customer = harness
                .add_customer(&format!("Anggota {}", i), "a@example.com", "0812")
                .await;
            let loan = service
                .create_loan(loan_request(customer), now + Duration::minutes(i))
                .await
                .unwrap();
            if i == 0 {
                service.approve_loan(loan.id, now).await.unwrap();
            }
        }

        let page = service
            .list_loans(ListLoansQuery {
                status: Some(LoanStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.loans.len(), 2);

        let page = service
            .list_loans(ListLoansQuery {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.loans.len(), 1);
        assert_eq!(page.loans[0].contract_number, "KOP-2024-0001");
    }
}
