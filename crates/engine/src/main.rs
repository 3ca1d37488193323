//! `credential-engine` — JSON-lines driver entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`EngineConfig`] from environment variables.
//! 2. Initialise tracing.
//! 3. Build the encryption key ring and [`Encryptor`].
//! 4. Build the in-memory datastore and the [`Engine`].
//! 5. Serve commands from stdin until EOF, one JSON outcome per line on stdout.

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use credential_engine::clock::SystemClock;
use credential_engine::config::EngineConfig;
use credential_engine::crypto::Encryptor;
use credential_engine::store::InMemoryDatastore;
use credential_engine::{driver, telemetry, Engine};

fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = EngineConfig::from_env().map_err(|e| {
        // Tracing is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_tracing(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_conflict_retries = cfg.max_conflict_retries,
        "credential-engine starting"
    );

    // -----------------------------------------------------------------------
    // 3. Encryption
    // -----------------------------------------------------------------------
    let keys = cfg.key_ring()?;
    info!(keys = keys.len(), active_key = %cfg.active_encryption_key, "key ring loaded");
    let encryptor = Arc::new(Encryptor::new(keys));

    // -----------------------------------------------------------------------
    // 4. Engine
    // -----------------------------------------------------------------------
    let engine = Engine::new(Arc::new(InMemoryDatastore::new()), encryptor, Arc::new(SystemClock))
        .with_max_conflict_retries(cfg.max_conflict_retries);

    // -----------------------------------------------------------------------
    // 5. Command loop
    // -----------------------------------------------------------------------
    let handled = driver::run(&engine, io::stdin().lock(), io::stdout().lock())?;
    info!(handled, "input closed, shutting down");

    Ok(())
}
