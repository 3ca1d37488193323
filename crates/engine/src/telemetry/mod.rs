//! Structured logging setup.
//!
//! # Telemetry invariants
//!
//! - **No secret material** (credential values, private keys, encryption
//!   keys) may appear in any log field. Names, actors, types and version ids
//!   are fine.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::init_tracing;
