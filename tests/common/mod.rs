//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use koperasi_server::config::Config;
use koperasi_server::customer::{CustomerRecord, FieldCipher};
use koperasi_server::loan::{CreateLoanRequest, LoanWithInstallments};
use koperasi_server::notification::{
    Channel, NotificationProvider, NotificationTemplate, ProviderError, ProviderRegistry,
    ScheduleOffset,
};
use koperasi_server::state::AppState;
use koperasi_server::store::MemoryStore;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

pub fn test_config() -> Config {
    Config::development("postgresql://localhost/koperasi_test")
}

/// Provider that records every call, fails while told to and can be slowed down
pub struct ScriptedProvider {
    channel: Channel,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    recipients: Mutex<Vec<String>>,
    bodies: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            recipients: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every call for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recipients(&self) -> Vec<String> {
        self.recipients.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationProvider for ScriptedProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        self.recipients.lock().unwrap().push(recipient.to_string());
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

/// In-memory application with scripted providers on both channels
pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub cipher: FieldCipher,
    pub email: Arc<ScriptedProvider>,
    pub whatsapp: Arc<ScriptedProvider>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let config = test_config();
        let store = Arc::new(MemoryStore::new());
        let email = ScriptedProvider::new(Channel::Email);
        let whatsapp = ScriptedProvider::new(Channel::WhatsApp);
        let providers = ProviderRegistry::new()
            .with(email.clone())
            .with(whatsapp.clone());

        let state = AppState::build(
            &config,
            store.clone(),
            store.clone(),
            store.clone(),
            providers,
            None,
        );

        Self {
            cipher: FieldCipher::from_secret(&config.field_encryption_key),
            config,
            store,
            email,
            whatsapp,
            state,
        }
    }

    pub async fn add_customer(&self, name: &str, email: &str, phone: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .add_customer(CustomerRecord {
                id,
                name: name.to_string(),
                email: self.cipher.encrypt(email).unwrap(),
                phone: self.cipher.encrypt(phone).unwrap(),
            })
            .await;
        id
    }

    pub async fn add_template(
        &self,
        name: &str,
        channel: Channel,
        schedule: ScheduleOffset,
        body: &str,
    ) -> NotificationTemplate {
        let created = at(2024, 1, 1, 0, 0);
        let template = NotificationTemplate {
            id: Uuid::new_v4(),
            name: name.to_string(),
            channel,
            subject: match channel {
                Channel::Email => "Pengingat {{.no_kontrak}}".to_string(),
                Channel::WhatsApp => String::new(),
            },
            body: body.to_string(),
            schedule,
            active: true,
            created_at: created,
            updated_at: created,
        };
        self.store.add_template(template.clone()).await;
        template
    }

    /// Create, approve, disburse and activate a 12,000,000 loan at 12% over 12 months
    pub async fn active_loan(&self, customer_id: Uuid, disbursed_at: DateTime<Utc>) -> LoanWithInstallments {
        let service = &self.state.loan_service;
        let loan = service
            .create_loan(
                CreateLoanRequest {
                    customer_id,
                    amount: 12_000_000,
                    interest_rate: 12.0,
                    term: 12,
                },
                disbursed_at,
            )
            .await
            .unwrap();
        service.approve_loan(loan.id, disbursed_at).await.unwrap();
        let disbursed = service.disburse_loan(loan.id, disbursed_at).await.unwrap();
        let loan = service.activate_loan(loan.id, disbursed_at).await.unwrap();

        LoanWithInstallments {
            loan,
            installments: disbursed.installments,
        }
    }
}
