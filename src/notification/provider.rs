//! Channel providers
//!
//! The dispatcher only talks to `dyn NotificationProvider`; which concrete
//! provider serves a channel is decided once at startup from the credentials
//! present in the configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use thiserror::Error;

use super::model::Channel;
use crate::config::{Config, SmtpConfig, WhatsAppConfig};

/// Why a send did not go through. Recorded on the log, never fatal to a batch.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Provider call timed out after {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ProviderError>;
}

/// SMTP over STARTTLS
pub struct EmailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailProvider {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let sender = if config.from.is_empty() {
            &config.username
        } else {
            &config.from
        };
        let from = sender
            .parse::<Mailbox>()
            .map_err(|e| ProviderError::InvalidRecipient(format!("sender {}: {}", sender, e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ProviderError> {
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| ProviderError::InvalidRecipient(format!("{}: {}", recipient, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ProviderError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        tracing::debug!(recipient, "Email sent");
        Ok(())
    }
}

/// Meta Cloud API text messages
pub struct WhatsAppProvider {
    client: Client,
    config: WhatsAppConfig,
}

impl WhatsAppProvider {
    pub fn new(config: &WhatsAppConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }
}

#[async_trait]
impl NotificationProvider for WhatsAppProvider {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<(), ProviderError> {
        if !self.config.is_configured() {
            return Err(ProviderError::NotConfigured("whatsapp"));
        }

        let phone = normalize_phone(recipient);
        if phone.is_empty() {
            return Err(ProviderError::InvalidRecipient(recipient.to_string()));
        }

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": phone,
            "type": "text",
            "text": { "body": body },
        });

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(recipient = %phone, "WhatsApp message sent");
        Ok(())
    }
}

/// Strip `+`, spaces and dashes; a local `08…` number becomes `628…`
pub fn normalize_phone(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();

    match cleaned.strip_prefix('0') {
        Some(rest) if rest.starts_with('8') => format!("62{}", rest),
        _ => cleaned,
    }
}

/// Logs instead of sending; used when a channel has no credentials
pub struct MockProvider {
    channel: Channel,
    sent: AtomicUsize,
}

impl MockProvider {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationProvider for MockProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ProviderError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            channel = self.channel.as_str(),
            recipient,
            subject,
            body_len = body.len(),
            "Mock notification delivered"
        );
        Ok(())
    }
}

/// Provider per channel
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn NotificationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live providers where credentials exist, mocks everywhere else
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.reminders.provider_timeout_seconds);
        let mut registry = Self::new();

        let email: Arc<dyn NotificationProvider> = if config.smtp.is_configured() {
            match EmailProvider::new(&config.smtp, timeout) {
                Ok(provider) => {
                    tracing::info!(host = %config.smtp.host, "Email channel uses SMTP");
                    Arc::new(provider)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SMTP setup failed, email channel falls back to mock");
                    Arc::new(MockProvider::new(Channel::Email))
                }
            }
        } else {
            tracing::info!("SMTP not configured, email channel uses mock provider");
            Arc::new(MockProvider::new(Channel::Email))
        };
        registry.register(email);

        let whatsapp: Arc<dyn NotificationProvider> = if config.whatsapp.is_configured() {
            match WhatsAppProvider::new(&config.whatsapp, timeout) {
                Ok(provider) => {
                    tracing::info!("WhatsApp channel uses the Cloud API");
                    Arc::new(provider)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WhatsApp setup failed, channel falls back to mock");
                    Arc::new(MockProvider::new(Channel::WhatsApp))
                }
            }
        } else {
            tracing::info!("WhatsApp not configured, channel uses mock provider");
            Arc::new(MockProvider::new(Channel::WhatsApp))
        };
        registry.register(whatsapp);

        registry
    }

    /// Register under the provider's own channel, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn NotificationProvider>) {
        self.providers.insert(provider.channel(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn NotificationProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn NotificationProvider>> {
        self.providers.get(&channel).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("0812-3456-7890"), "6281234567890");
        assert_eq!(normalize_phone("+62 812 3456 7890"), "6281234567890");
        assert_eq!(normalize_phone("6281234567890"), "6281234567890");
        assert_eq!(normalize_phone("021-555-1234"), "0215551234");
        assert_eq!(normalize_phone(""), "");
    }

    #[tokio::test]
    async fn test_registry_without_credentials_uses_mocks() {
        let config = Config::development("postgresql://localhost/koperasi");
        let registry = ProviderRegistry::from_config(&config);

        let email = registry.get(Channel::Email).unwrap();
        assert_eq!(email.channel(), Channel::Email);
        assert!(email.send("a@b.c", "s", "b").await.is_ok());
        assert!(registry.get(Channel::WhatsApp).is_some());
    }

    #[tokio::test]
    async fn test_mock_counts_sends() {
        let mock = MockProvider::new(Channel::WhatsApp);
        mock.send("0812", "", "hi").await.unwrap();
        mock.send("0813", "", "hi").await.unwrap();
        assert_eq!(mock.sent_count(), 2);
    }
}
