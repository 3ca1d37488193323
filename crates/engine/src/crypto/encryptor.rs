//! The [`EncryptionProvider`] contract and its key-ring backed implementation.

use common::ServiceError;
use thiserror::Error;
use tracing::warn;

use super::cipher::{self, CipherError, EncryptedValue};
use super::keyring::{KeyRing, KeyRingError};

/// Failures of an [`EncryptionProvider`]. Neither kind is retried.
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// No usable key: the ring is empty, no key is active, or the key that
    /// sealed a value is no longer present.
    #[error("{0}")]
    Unavailable(String),

    /// Authentication-tag verification failed (tampering or wrong key).
    #[error("{0}")]
    DecryptionFailed(String),
}

impl From<EncryptionError> for ServiceError {
    fn from(e: EncryptionError) -> Self {
        match e {
            EncryptionError::Unavailable(m) => ServiceError::EncryptionUnavailable(m),
            EncryptionError::DecryptionFailed(m) => ServiceError::DecryptionFailed(m),
        }
    }
}

impl From<KeyRingError> for EncryptionError {
    fn from(e: KeyRingError) -> Self {
        EncryptionError::Unavailable(e.to_string())
    }
}

/// Envelope encryption of opaque byte values.
///
/// `seal` always uses the currently active key; `unseal` accepts any key id
/// the provider still knows so that old versions stay readable after rotation.
#[cfg_attr(test, mockall::automock)]
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt `cleartext` under the active key.
    fn seal(&self, cleartext: &[u8]) -> Result<EncryptedValue, EncryptionError>;

    /// Decrypt a value previously produced by [`EncryptionProvider::seal`].
    fn unseal(&self, value: &EncryptedValue) -> Result<Vec<u8>, EncryptionError>;

    /// Identifier of the key `seal` currently uses.
    fn active_key_id(&self) -> Result<String, EncryptionError>;
}

/// [`EncryptionProvider`] backed by an in-process [`KeyRing`] and AES-256-GCM-SIV.
#[derive(Clone, Debug)]
pub struct Encryptor {
    keys: KeyRing,
}

impl Encryptor {
    pub fn new(keys: KeyRing) -> Self {
        Self { keys }
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.keys
    }
}

impl EncryptionProvider for Encryptor {
    fn seal(&self, cleartext: &[u8]) -> Result<EncryptedValue, EncryptionError> {
        let (key_id, key) = self.keys.active()?;
        let (nonce, ciphertext) = cipher::encrypt(cleartext, key.as_bytes())
            .map_err(|e| EncryptionError::Unavailable(e.to_string()))?;
        Ok(EncryptedValue {
            ciphertext,
            nonce,
            key_id,
        })
    }

    fn unseal(&self, value: &EncryptedValue) -> Result<Vec<u8>, EncryptionError> {
        let key = self.keys.get(&value.key_id)?;
        cipher::decrypt(&value.ciphertext, &value.nonce, key.as_bytes()).map_err(|e| match e {
            CipherError::AeadFailure => {
                warn!(key_id = %value.key_id, "sealed value failed authentication");
                EncryptionError::DecryptionFailed(format!(
                    "value sealed under key {} failed authentication",
                    value.key_id
                ))
            }
            CipherError::InvalidKeyLength => EncryptionError::Unavailable(e.to_string()),
        })
    }

    fn active_key_id(&self) -> Result<String, EncryptionError> {
        Ok(self.keys.active()?.0)
    }
}
