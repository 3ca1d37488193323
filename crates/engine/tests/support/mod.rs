//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::DateTime;
use common::protocol::{CredentialView, GenerateRequest, PermissionsRequest, SetRequest};
use common::{Actor, CredentialValue, ServiceError};
use credential_engine::clock::FixedClock;
use credential_engine::crypto::{Encryptor, KeyRing, KEY_LEN};
use credential_engine::generator::{
    CredentialGenerator, GenerationContext, GenerationError, GeneratorSet,
};
use credential_engine::params::GenerationParameters;
use credential_engine::store::InMemoryDatastore;
use credential_engine::Engine;
use mockall::mock;
use serde_json::Value;

mock! {
    pub Generator {}

    impl CredentialGenerator for Generator {
        fn generate(
            &self,
            parameters: &GenerationParameters,
            ctx: &GenerationContext,
        ) -> Result<CredentialValue, GenerationError>;
    }
}

pub struct Harness {
    pub store: Arc<InMemoryDatastore>,
    pub encryptor: Arc<Encryptor>,
    pub clock: Arc<FixedClock>,
    pub engine: Engine,
}

pub fn key_ring() -> KeyRing {
    let ring = KeyRing::new();
    ring.insert("key-1", &[1u8; KEY_LEN]).unwrap();
    ring.activate("key-1").unwrap();
    ring
}

/// An engine with the built-in generators.
pub fn harness() -> Harness {
    harness_with(GeneratorSet::new())
}

pub fn harness_with(generators: GeneratorSet) -> Harness {
    let store = Arc::new(InMemoryDatastore::new());
    let encryptor = Arc::new(Encryptor::new(key_ring()));
    let clock = Arc::new(FixedClock::new(DateTime::from_timestamp(1_400_011_000, 0).unwrap()));
    let engine =
        Engine::new(store.clone(), encryptor.clone(), clock.clone()).with_generators(generators);
    Harness {
        store,
        encryptor,
        clock,
        engine,
    }
}

pub fn alice() -> Actor {
    Actor::new("uaa-user:alice")
}

pub fn bob() -> Actor {
    Actor::new("uaa-user:bob")
}

impl Harness {
    pub fn generate(&self, actor: &Actor, raw: Value) -> Result<CredentialView, ServiceError> {
        let request: GenerateRequest = serde_json::from_value(raw).unwrap();
        self.engine.generate(actor, &request)
    }

    pub fn set(&self, actor: &Actor, raw: Value) -> Result<CredentialView, ServiceError> {
        let request: SetRequest = serde_json::from_value(raw).unwrap();
        self.engine.set(actor, &request)
    }

    pub fn add_permissions(&self, actor: &Actor, raw: Value) -> Result<(), ServiceError> {
        let request: PermissionsRequest = serde_json::from_value(raw).unwrap();
        self.engine.add_permissions(actor, &request).map(|_| ())
    }

    pub fn audit_codes(&self) -> Vec<Vec<&'static str>> {
        self.store
            .audit_records()
            .iter()
            .map(|r| r.events.iter().map(|e| e.operation.as_str()).collect())
            .collect()
    }
}
