//! Payment reminders: templates, matching, providers and dispatch

pub mod dispatcher;
pub mod matcher;
pub mod model;
pub mod provider;
pub mod template;

pub use dispatcher::{NotificationDispatcher, SendOutcome};
pub use matcher::ReminderMatcher;
pub use model::*;
pub use provider::{
    normalize_phone, EmailProvider, MockProvider, NotificationProvider, ProviderError,
    ProviderRegistry, WhatsAppProvider,
};
pub use template::{format_currency, render, TemplateContext};
