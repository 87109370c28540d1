//! Reversible encryption for customer contact fields
//!
//! AES-256-GCM with a key derived from the configured secret. Ciphertext is
//! `base64(nonce || sealed)`. The empty string maps to itself both ways.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid base64 ciphertext: {0}")]
    Encoding(String),

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Encryption failed")]
    Seal,

    #[error("Decryption failed")]
    Open,

    #[error("Decrypted value is not UTF-8")]
    NotUtf8,
}

#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn from_secret(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::Seal)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Open)?;

        String::from_utf8(plain).map_err(|_| CipherError::NotUtf8)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_maps_to_empty() {
        let cipher = FieldCipher::from_secret("k");
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_decrypt_reverses_encrypt() {
        let cipher = FieldCipher::from_secret("k");
        let sealed = cipher.encrypt("0812-3456-7890").unwrap();
        assert_ne!(sealed, "0812-3456-7890");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "0812-3456-7890");
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = FieldCipher::from_secret("one").encrypt("x@y.z").unwrap();
        assert!(matches!(
            FieldCipher::from_secret("two").decrypt(&sealed),
            Err(CipherError::Open)
        ));
        assert!(matches!(
            FieldCipher::from_secret("one").decrypt("AAAA"),
            Err(CipherError::Truncated)
        ));
    }
}
