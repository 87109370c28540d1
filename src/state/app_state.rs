//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::calendar::LocalCalendar;
use crate::config::Config;
use crate::customer::{CustomerContacts, FieldCipher};
use crate::db::Database;
use crate::loan::{DpdRecalculator, LoanService};
use crate::notification::{NotificationDispatcher, ProviderRegistry, ReminderMatcher};
use crate::scheduler::{ReminderJobs, ReminderScheduler};
use crate::store::{CustomerDirectory, LoanStore, NotificationStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_service: Arc<LoanService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub scheduler: Arc<ReminderScheduler>,
    /// `None` when running on the in-memory store
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        loan_service: Arc<LoanService>,
        dispatcher: Arc<NotificationDispatcher>,
        scheduler: Arc<ReminderScheduler>,
        database: Option<Database>,
    ) -> Self {
        Self {
            loan_service,
            dispatcher,
            scheduler,
            database,
        }
    }

    /// Wire every service over the given stores. The scheduler is built but
    /// not started.
    pub fn build(
        config: &Config,
        loans: Arc<dyn LoanStore>,
        notifications: Arc<dyn NotificationStore>,
        directory: Arc<dyn CustomerDirectory>,
        providers: ProviderRegistry,
        database: Option<Database>,
    ) -> Self {
        let calendar = LocalCalendar::new(config.scheduler.offset());
        let customers = CustomerContacts::new(
            directory,
            FieldCipher::from_secret(&config.field_encryption_key),
        );

        let loan_service = Arc::new(LoanService::new(loans.clone(), customers.clone()));
        let dispatcher = NotificationDispatcher::new(
            notifications.clone(),
            customers.clone(),
            providers,
            calendar,
            config.reminders.clone(),
        );
        let matcher = ReminderMatcher::new(notifications.clone(), customers, calendar);
        let jobs = ReminderJobs::new(
            notifications,
            matcher,
            dispatcher.clone(),
            DpdRecalculator::new(loans),
            calendar,
        );
        let scheduler = ReminderScheduler::new(jobs, config.scheduler.clone());

        Self::new(loan_service, Arc::new(dispatcher), scheduler, database)
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<NotificationDispatcher> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.dispatcher.clone()
    }
}

impl FromRef<AppState> for Arc<ReminderScheduler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.scheduler.clone()
    }
}
