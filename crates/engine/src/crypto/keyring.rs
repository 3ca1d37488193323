//! [`KeyRing`]: thread-safe set of encryption keys with one active key.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use super::cipher::KEY_LEN;

/// Errors produced by the key ring.
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// No key has been activated yet.
    #[error("no active encryption key")]
    NoActiveKey,

    /// The requested key id is not in the ring.
    #[error("unknown encryption key: {0}")]
    UnknownKey(String),

    /// The key material has an unexpected length.
    #[error("encryption key has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),

    /// A key specification string could not be parsed.
    #[error("invalid key specification: {0}")]
    InvalidSpec(String),
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
pub struct EncryptionKey(Box<[u8; KEY_LEN]>);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material — not even in debug builds.
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[derive(Debug, Default)]
struct RingState {
    keys: HashMap<String, Arc<EncryptionKey>>,
    active: Option<String>,
}

/// Thread-safe key ring.
///
/// Internally backed by [`ArcSwap`] so readers on the seal/unseal path never
/// block, while adding or activating a key atomically swaps in a new state.
/// Retired keys stay in the ring so historical versions remain readable.
#[derive(Clone, Debug)]
pub struct KeyRing {
    inner: Arc<ArcSwap<RingState>>,
}

impl KeyRing {
    /// Create a new, empty [`KeyRing`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(RingState::default())),
        }
    }

    /// Build a ring from a `id=base64key,id=base64key` specification and
    /// activate `active_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::InvalidSpec`] for malformed entries or base64,
    /// [`KeyRingError::InvalidLength`] for keys of the wrong size, and
    /// [`KeyRingError::UnknownKey`] if `active_id` is not among the keys.
    pub fn from_spec(spec: &str, active_id: &str) -> Result<Self, KeyRingError> {
        let ring = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, encoded) = entry
                .split_once('=')
                .ok_or_else(|| KeyRingError::InvalidSpec("entry without '='".into()))?;
            let id = id.trim();
            if id.is_empty() {
                return Err(KeyRingError::InvalidSpec("empty key id".into()));
            }
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|_| KeyRingError::InvalidSpec(format!("key {id} is not valid base64")))?;
            ring.insert(id, &bytes)?;
        }
        ring.activate(active_id)?;
        Ok(ring)
    }

    /// Add (or replace) the key stored under `id`. Does not change the active key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::InvalidLength`] if the slice is not [`KEY_LEN`] bytes.
    pub fn insert(&self, id: &str, key_bytes: &[u8]) -> Result<(), KeyRingError> {
        if key_bytes.len() != KEY_LEN {
            return Err(KeyRingError::InvalidLength(key_bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(key_bytes);
        let key = Arc::new(EncryptionKey(buf));
        self.inner.rcu(|state| {
            let mut keys = state.keys.clone();
            keys.insert(id.to_owned(), Arc::clone(&key));
            RingState {
                keys,
                active: state.active.clone(),
            }
        });
        Ok(())
    }

    /// Make `id` the key used for all subsequent seals.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::UnknownKey`] if `id` is not in the ring.
    pub fn activate(&self, id: &str) -> Result<(), KeyRingError> {
        if !self.inner.load().keys.contains_key(id) {
            return Err(KeyRingError::UnknownKey(id.to_owned()));
        }
        self.inner.rcu(|state| RingState {
            keys: state.keys.clone(),
            active: Some(id.to_owned()),
        });
        Ok(())
    }

    /// The active key id and key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::NoActiveKey`] if no key has been activated.
    pub fn active(&self) -> Result<(String, Arc<EncryptionKey>), KeyRingError> {
        let state = self.inner.load();
        let id = state.active.as_ref().ok_or(KeyRingError::NoActiveKey)?;
        let key = state
            .keys
            .get(id)
            .cloned()
            .ok_or_else(|| KeyRingError::UnknownKey(id.clone()))?;
        Ok((id.clone(), key))
    }

    /// Look up a key by id, active or retired.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::UnknownKey`] if `id` is not present.
    pub fn get(&self, id: &str) -> Result<Arc<EncryptionKey>, KeyRingError> {
        self.inner
            .load()
            .keys
            .get(id)
            .cloned()
            .ok_or_else(|| KeyRingError::UnknownKey(id.to_owned()))
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.inner.load().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}
