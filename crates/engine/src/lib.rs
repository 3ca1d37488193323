//! Credential generation, convergence, encryption and access-control engine.
//!
//! [`engine::Engine`] is the entry point. It is assembled from a
//! [`store::Datastore`], an [`crypto::EncryptionProvider`] and a
//! [`clock::Clock`]; every operation runs in one datastore transaction that
//! carries the credential write, the permission changes and the audit record.

pub mod audit;
pub mod clock;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod driver;
pub mod engine;
pub mod generator;
pub mod params;
pub mod permission;
pub mod store;
pub mod telemetry;

pub use engine::Engine;
