mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{Actor, CredentialType, CredentialValue, ServiceError};
use credential_engine::audit::AuditRecord;
use credential_engine::clock::SystemClock;
use credential_engine::credential::CredentialVersion;
use credential_engine::crypto::{Encryptor, KeyRing, KEY_LEN};
use credential_engine::generator::{GenerationError, GeneratorSet};
use credential_engine::permission::AccessControlEntry;
use credential_engine::store::{
    AuditLog, CredentialStore, Datastore, InMemoryDatastore, PermissionStore, StoreError,
    Transaction,
};
use credential_engine::Engine;
use serde_json::json;
use uuid::Uuid;

use support::{alice, harness, harness_with, key_ring, MockGenerator};

#[test]
fn generation_failure_writes_nothing() {
    let mut generator = MockGenerator::new();
    generator
        .expect_generate()
        .returning(|_, _| Err(GenerationError::new("entropy exhausted")));
    let h = harness_with(GeneratorSet::new().with_generator(CredentialType::Password, generator));

    let err = h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap_err();
    assert!(matches!(err, ServiceError::GenerationFailed(ref m) if m == "entropy exhausted"));
    assert_eq!(h.store.save_count(), 0);
    assert!(h.store.audit_records().is_empty());
    assert!(matches!(h.engine.permissions(&alice(), "/p"), Err(ServiceError::NotFound(_))));
}

#[test]
fn invalid_parameters_fail_before_any_work() {
    let mut generator = MockGenerator::new();
    generator.expect_generate().times(0);
    let h = harness_with(GeneratorSet::new().with_generator(CredentialType::Password, generator));

    for raw in [
        json!({"name": "/p", "type": "password", "parameters": {"length": 2}}),
        json!({
            "name": "/p",
            "type": "password",
            "parameters": {"exclude_upper": true, "exclude_lower": true, "exclude_number": true}
        }),
        json!({"name": "/p", "type": "password", "parameters": {"unknown": 1}}),
        json!({"name": "/a//b", "type": "password"}),
    ] {
        assert!(matches!(h.generate(&alice(), raw), Err(ServiceError::ValidationFailed(_))));
    }
    assert!(h.store.audit_records().is_empty());
}

#[test]
fn unavailable_encryption_fails_fast() {
    let store = Arc::new(InMemoryDatastore::new());
    let encryptor = Arc::new(Encryptor::new(KeyRing::new()));
    let engine = Engine::new(store.clone(), encryptor, Arc::new(SystemClock));
    let request = serde_json::from_value(json!({"name": "/p", "type": "password"})).unwrap();
    let err = engine.generate(&alice(), &request).unwrap_err();
    assert!(matches!(err, ServiceError::EncryptionUnavailable(_)));
    assert_eq!(store.save_count(), 0);
    assert!(store.audit_records().is_empty());
}

#[test]
fn concurrent_converge_creates_one_version() {
    let h = harness();
    let ids: Vec<Uuid> = std::thread::scope(|scope| {
        let converge = || {
            h.generate(&alice(), json!({"name": "/p", "type": "password"}))
                .unwrap()
                .id
        };
        let workers: Vec<_> = (0..4).map(|_| scope.spawn(converge)).collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(h.store.version_count("/p"), 1);
    assert_eq!(h.store.save_count(), 1);
}

#[test]
fn key_rotation_keeps_values_readable() {
    let h = harness();
    let password = h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    let rsa = h.generate(&alice(), json!({"name": "/r", "type": "rsa"})).unwrap();

    h.encryptor.key_ring().insert("key-2", &[2u8; KEY_LEN]).unwrap();
    h.encryptor.key_ring().activate("key-2").unwrap();
    assert_eq!(h.engine.rotate_encryption_keys(&alice()).unwrap(), 2);
    assert_eq!(h.engine.rotate_encryption_keys(&alice()).unwrap(), 0);

    assert_eq!(h.engine.get(&alice(), "/p").unwrap().value, password.value);
    assert_eq!(h.engine.get(&alice(), "/r").unwrap().value, rsa.value);

    // Rotation re-seals in place; converge still recognises the version.
    let again = h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    assert_eq!(again.id, password.id);
}

#[test]
fn values_sealed_under_a_lost_key_are_unavailable() {
    let h = harness();
    let fresh = Arc::new(InMemoryDatastore::new());
    let engine = Engine::new(fresh.clone(), h.encryptor.clone(), Arc::new(SystemClock));
    let request =
        serde_json::from_value(json!({"name": "/q", "type": "password", "value": "pw"})).unwrap();
    engine.set(&alice(), &request).unwrap();

    let other_ring = KeyRing::new();
    other_ring.insert("key-9", &[9u8; KEY_LEN]).unwrap();
    other_ring.activate("key-9").unwrap();
    let blind = Engine::new(fresh, Arc::new(Encryptor::new(other_ring)), Arc::new(SystemClock));
    assert!(matches!(blind.get(&alice(), "/q"), Err(ServiceError::EncryptionUnavailable(_))));
}

// ---------------------------------------------------------------------------
// Commit conflicts
// ---------------------------------------------------------------------------

/// Datastore whose commits always report a conflict.
struct Conflicting {
    inner: InMemoryDatastore,
    attempts: AtomicUsize,
}

struct ConflictingTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
    attempts: &'a AtomicUsize,
}

impl Datastore for Conflicting {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(ConflictingTransaction {
            inner: self.inner.begin(),
            attempts: &self.attempts,
        })
    }
}

impl CredentialStore for ConflictingTransaction<'_> {
    fn find_most_recent(&mut self, name: &str) -> Result<Option<CredentialVersion>, StoreError> {
        self.inner.find_most_recent(name)
    }
    fn find_by_id(&mut self, id: Uuid) -> Result<Option<CredentialVersion>, StoreError> {
        self.inner.find_by_id(id)
    }
    fn find_all_by_name(&mut self, name: &str) -> Result<Vec<CredentialVersion>, StoreError> {
        self.inner.find_all_by_name(name)
    }
    fn save(&mut self, version: CredentialVersion) -> Result<(), StoreError> {
        self.inner.save(version)
    }
    fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError> {
        self.inner.delete_by_name(name)
    }
    fn find_sealed_with_other_key(
        &mut self,
        active_key_id: &str,
    ) -> Result<Vec<CredentialVersion>, StoreError> {
        self.inner.find_sealed_with_other_key(active_key_id)
    }
    fn update_sealed(&mut self, version: &CredentialVersion) -> Result<(), StoreError> {
        self.inner.update_sealed(version)
    }
}

impl PermissionStore for ConflictingTransaction<'_> {
    fn find_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError> {
        self.inner.find_permission(name, actor)
    }
    fn find_permissions(&mut self, name: &str) -> Result<Vec<AccessControlEntry>, StoreError> {
        self.inner.find_permissions(name)
    }
    fn save_permission(&mut self, entry: AccessControlEntry) -> Result<(), StoreError> {
        self.inner.save_permission(entry)
    }
    fn delete_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError> {
        self.inner.delete_permission(name, actor)
    }
    fn delete_permissions(&mut self, name: &str) -> Result<usize, StoreError> {
        self.inner.delete_permissions(name)
    }
}

impl AuditLog for ConflictingTransaction<'_> {
    fn append(&mut self, record: AuditRecord) -> Result<(), StoreError> {
        self.inner.append(record)
    }
}

impl Transaction for ConflictingTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Conflict("/p".into()))
    }
}

#[test]
fn conflicts_are_retried_then_reported() {
    let store = Arc::new(Conflicting {
        inner: InMemoryDatastore::new(),
        attempts: AtomicUsize::new(0),
    });
    let encryptor = Arc::new(Encryptor::new(key_ring()));
    let engine = Engine::new(store.clone(), encryptor, Arc::new(SystemClock))
        .with_max_conflict_retries(2);
    let request = serde_json::from_value(json!({"name": "/p", "type": "password"})).unwrap();

    let err = engine.generate(&alice(), &request).unwrap_err();
    assert!(matches!(err, ServiceError::ConflictRetryExhausted(_)));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.save_count(), 0);
    assert!(store.inner.audit_records().is_empty());
}

#[test]
fn set_values_round_trip_through_sealing() {
    let h = harness();
    let value = json!({"public_key": "ssh-rsa AAAA", "private_key": "private-key-material"});
    let view = h
        .set(&alice(), json!({"name": "/k", "type": "ssh", "value": value}))
        .unwrap();
    match &view.value {
        CredentialValue::Ssh(v) => assert_eq!(v.private_key, "private-key-material"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.engine.get(&alice(), "/k").unwrap().value, view.value);
    assert!(matches!(
        h.set(&alice(), json!({"name": "/e", "type": "password", "value": ""})),
        Err(ServiceError::ValidationFailed(_))
    ));
}
