//! Envelope encryption of credential payloads.
//!
//! This module is intentionally free of credential semantics. It seals and
//! unseals opaque bytes against a [`KeyRing`] and records, alongside every
//! ciphertext, the nonce and key id needed to unseal it after rotation.

pub mod cipher;
pub mod encryptor;
pub mod keyring;

pub use cipher::{EncryptedValue, KEY_LEN};
pub use encryptor::{EncryptionError, EncryptionProvider, Encryptor};
pub use keyring::KeyRing;

#[cfg(test)]
pub use encryptor::MockEncryptionProvider;
