//! Configuration loading and validation for the credential engine.
//!
//! All values are read from environment variables at startup. The process
//! exits with a clear error message if any required variable is missing or
//! invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::crypto::KeyRing;
use crate::engine::DEFAULT_MAX_CONFLICT_RETRIES;

/// Upper bound on `MAX_CONFLICT_RETRIES`.
const MAX_CONFLICT_RETRIES_LIMIT: u32 = 100;

/// Validated engine configuration.
#[derive(Clone, Deserialize)]
pub struct EngineConfig {
    /// Comma-separated `id=base64key` pairs of 32-byte encryption keys.
    /// **Required.**
    pub encryption_keys: String,

    /// Id of the key new values are sealed with. **Required.**
    pub active_encryption_key: String,

    /// Additional attempts after a commit conflict before giving up.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}
fn default_log_level() -> String {
    "info".into()
}

// Key material stays out of logs.
impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("encryption_keys", &"[REDACTED]")
            .field("active_encryption_key", &self.active_encryption_key)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl EngineConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: EngineConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Build the key ring described by `ENCRYPTION_KEYS` with
    /// `ACTIVE_ENCRYPTION_KEY` active.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed entries, keys of the wrong length, or an
    /// active id that names no configured key.
    pub fn key_ring(&self) -> Result<KeyRing> {
        KeyRing::from_spec(&self.encryption_keys, &self.active_encryption_key)
            .context("ENCRYPTION_KEYS / ACTIVE_ENCRYPTION_KEY are invalid")
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.encryption_keys, "ENCRYPTION_KEYS")?;
        ensure_non_empty(&self.active_encryption_key, "ACTIVE_ENCRYPTION_KEY")?;

        if self.max_conflict_retries > MAX_CONFLICT_RETRIES_LIMIT {
            anyhow::bail!("MAX_CONFLICT_RETRIES must be at most {MAX_CONFLICT_RETRIES_LIMIT}");
        }
        self.key_ring()?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
