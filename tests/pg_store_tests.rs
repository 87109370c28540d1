//! PostgreSQL store tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;

    use koperasi_server::customer::{CustomerContacts, FieldCipher};
    use koperasi_server::db;
    use koperasi_server::loan::{
        CreateLoanRequest, InstallmentPaymentRequest, InstallmentStatus, LoanService, LoanStatus,
    };
    use koperasi_server::notification::{NotificationLog, NotificationStatus};
    use koperasi_server::store::{LoanStore, NotificationStore, PgStore};

    /// Helper to create a migrated test database pool
    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/koperasi_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    async fn insert_customer(pool: &PgPool, cipher: &FieldCipher) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO customers (id, name, email, phone) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind("Budi Santoso")
            .bind(cipher.encrypt("budi@example.com").unwrap())
            .bind(cipher.encrypt("081234567890").unwrap())
            .execute(pool)
            .await
            .expect("Failed to insert customer");
        id
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_default_templates_are_seeded() {
        let store = PgStore::new(setup_test_db().await);
        let templates = store.active_templates().await.unwrap();

        assert!(templates.len() >= 6);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_loan_lifecycle_on_postgres() {
        let pool = setup_test_db().await;
        let cipher = FieldCipher::from_secret("pg-test-secret");
        let customer_id = insert_customer(&pool, &cipher).await;
        let store = Arc::new(PgStore::new(pool.clone()));
        let service = LoanService::new(
            store.clone(),
            CustomerContacts::new(store.clone(), cipher),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 3, 0, 0).unwrap();

        let loan = service
            .create_loan(
                CreateLoanRequest {
                    customer_id,
                    amount: 12_000_000,
                    interest_rate: 12.0,
                    term: 12,
                },
                now,
            )
            .await
            .unwrap();
        assert!(loan.contract_number.starts_with("KOP-2024-"));
        assert_eq!(store.count_open_loans(customer_id).await.unwrap(), 1);

        service.approve_loan(loan.id, now).await.unwrap();
        let disbursed = service.disburse_loan(loan.id, now).await.unwrap();
        assert_eq!(disbursed.loan.status, LoanStatus::Disbursed);
        assert_eq!(store.list_installments(loan.id).await.unwrap().len(), 12);

        let first = &disbursed.installments[0];
        let outcome = service
            .pay_installment(
                InstallmentPaymentRequest {
                    installment_id: first.id,
                    amount: first.amount_due,
                    payment_date: first.due_date,
                },
                first.due_date,
            )
            .await
            .unwrap();
        assert_eq!(outcome.installment.status, InstallmentStatus::Paid);

        let later = disbursed.installments[1].due_date + Duration::days(3);
        store.recalculate_days_past_due(later).await.unwrap();
        let second = store
            .get_installment(disbursed.installments[1].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.days_past_due, 3);
        assert_eq!(second.status, InstallmentStatus::Overdue);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_claimed_log_is_held_until_outcome() {
        let pool = setup_test_db().await;
        let cipher = FieldCipher::from_secret("pg-test-secret");
        let customer_id = insert_customer(&pool, &cipher).await;
        let store = Arc::new(PgStore::new(pool.clone()));
        let service = LoanService::new(
            store.clone(),
            CustomerContacts::new(store.clone(), cipher),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 3, 0, 0).unwrap();

        let loan = service
            .create_loan(
                CreateLoanRequest {
                    customer_id,
                    amount: 6_000_000,
                    interest_rate: 12.0,
                    term: 6,
                },
                now,
            )
            .await
            .unwrap();
        service.approve_loan(loan.id, now).await.unwrap();
        let disbursed = service.disburse_loan(loan.id, now).await.unwrap();
        let template = store.active_templates().await.unwrap().remove(0);

        let log = NotificationLog {
            id: Uuid::new_v4(),
            installment_id: disbursed.installments[0].id,
            template_id: template.id,
            channel: template.channel,
            recipient: "budi@example.com".to_string(),
            subject: String::new(),
            body: "Pengingat".to_string(),
            status: NotificationStatus::Pending,
            scheduled_for: now,
            scheduled_on: now.date_naive(),
            attempts: 0,
            last_attempt_at: None,
            locked_until: None,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_log(&log).await.unwrap().unwrap();

        let lease = now + Duration::seconds(60);
        let claimed = store.claim_attempt(log.id, 3, now, lease).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        assert!(store.claim_attempt(log.id, 3, now, lease).await.unwrap().is_none());
        assert!(store
            .due_logs(now, 3)
            .await
            .unwrap()
            .iter()
            .all(|due| due.id != log.id));

        // An expired lease can be taken over
        let after_lease = lease + Duration::seconds(1);
        let retaken = store
            .claim_attempt(log.id, 3, after_lease, after_lease + Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retaken.attempts, 2);

        store
            .record_outcome(log.id, NotificationStatus::Sent, None, Some(after_lease), after_lease)
            .await
            .unwrap();
        let sent = store.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert_eq!(sent.locked_until, None);
    }
}
