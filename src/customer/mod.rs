//! Customer contact lookup
//!
//! Customer records are owned elsewhere; this module only reads the name and
//! the encrypted contact fields a reminder needs, and decrypts them.

mod cipher;

pub use cipher::{CipherError, FieldCipher};

use std::sync::Arc;

use uuid::Uuid;

use crate::notification::Channel;
use crate::store::{CustomerDirectory, StoreResult};

/// Customer row as stored; `email` and `phone` are ciphertext
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CustomerRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Decrypted contact details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerContact {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl CustomerContact {
    /// Address for a channel; empty when the customer has none
    pub fn address_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.email,
            Channel::WhatsApp => &self.phone,
        }
    }
}

/// Resolves customers to decrypted contact details
#[derive(Clone)]
pub struct CustomerContacts {
    directory: Arc<dyn CustomerDirectory>,
    cipher: FieldCipher,
}

impl CustomerContacts {
    pub fn new(directory: Arc<dyn CustomerDirectory>, cipher: FieldCipher) -> Self {
        Self { directory, cipher }
    }

    pub async fn exists(&self, customer_id: Uuid) -> StoreResult<bool> {
        Ok(self.directory.get_customer(customer_id).await?.is_some())
    }

    /// A field that fails to decrypt comes back empty so the caller skips
    /// that channel instead of failing the batch.
    pub async fn contact(&self, customer_id: Uuid) -> StoreResult<Option<CustomerContact>> {
        let Some(record) = self.directory.get_customer(customer_id).await? else {
            return Ok(None);
        };

        Ok(Some(CustomerContact {
            id: record.id,
            email: self.reveal(record.id, "email", &record.email),
            phone: self.reveal(record.id, "phone", &record.phone),
            name: record.name,
        }))
    }

    fn reveal(&self, customer_id: Uuid, field: &str, ciphertext: &str) -> String {
        match self.cipher.decrypt(ciphertext) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(
                    customer_id = %customer_id,
                    field,
                    error = %e,
                    "Failed to decrypt customer contact field"
                );
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_contact_decrypts_fields() {
        let cipher = FieldCipher::from_secret("test-secret");
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store
            .add_customer(CustomerRecord {
                id,
                name: "Siti Rahma".into(),
                email: cipher.encrypt("siti@example.com").unwrap(),
                phone: "not base64 at all".into(),
            })
            .await;

        let contacts = CustomerContacts::new(store, cipher);
        let contact = contacts.contact(id).await.unwrap().unwrap();

        assert_eq!(contact.name, "Siti Rahma");
        assert_eq!(contact.address_for(Channel::Email), "siti@example.com");
        // Undecryptable field degrades to empty
        assert_eq!(contact.address_for(Channel::WhatsApp), "");
        assert!(contacts.contact(Uuid::new_v4()).await.unwrap().is_none());
    }
}
