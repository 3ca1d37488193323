mod support;

use common::{Actor, PermissionOperation, ServiceError};
use serde_json::json;

use support::{alice, bob, harness};

#[test]
fn creator_receives_every_operation_atomically() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();

    let acl = h.engine.permissions(&alice(), "/p").unwrap();
    assert_eq!(acl.credential_name, "/p");
    assert_eq!(acl.permissions.len(), 1);
    assert_eq!(acl.permissions[0].actor, alice());
    assert_eq!(acl.permissions[0].operations, PermissionOperation::ALL);

    let records = h.store.audit_records();
    let first = &records[0];
    assert_eq!(first.events.len(), 6);
    let grants: Vec<_> = first.events[1..]
        .iter()
        .map(|e| (e.operation.as_str(), e.actor.clone(), e.granted_operation))
        .collect();
    let expected: Vec<_> = PermissionOperation::ALL
        .into_iter()
        .map(|op| ("acl_update", Some(alice()), Some(op)))
        .collect();
    assert_eq!(grants, expected);
}

#[test]
fn strangers_are_denied_and_not_audited() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    let before = h.store.audit_records().len();

    assert!(matches!(h.engine.get(&bob(), "/p"), Err(ServiceError::Unauthorized(_))));
    assert!(matches!(
        h.generate(&bob(), json!({"name": "/p", "type": "password"})),
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        h.generate(&bob(), json!({"name": "/p", "type": "password", "overwrite": true})),
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(h.engine.delete(&bob(), "/p"), Err(ServiceError::Unauthorized(_))));
    assert!(matches!(h.engine.permissions(&bob(), "/p"), Err(ServiceError::Unauthorized(_))));

    assert_eq!(h.store.audit_records().len(), before);
    assert_eq!(h.store.version_count("/p"), 1);
}

#[test]
fn granted_read_allows_get_only() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    h.add_permissions(
        &alice(),
        json!({
            "credential_name": "p",
            "permissions": [{"actor": "uaa-user:bob", "operations": ["read"]}]
        }),
    )
    .unwrap();

    assert!(h.engine.get(&bob(), "/p").is_ok());
    assert!(matches!(
        h.generate(&bob(), json!({"name": "/p", "type": "password", "overwrite": true})),
        Err(ServiceError::Unauthorized(_))
    ));

    let codes = h.audit_codes();
    assert_eq!(codes[1], ["acl_update"]);
    assert_eq!(codes[2], ["credential_access"]);
}

#[test]
fn grants_merge_and_can_be_revoked() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    for op in ["read", "write"] {
        h.add_permissions(
            &alice(),
            json!({
                "credential_name": "/p",
                "permissions": [{"actor": "uaa-user:bob", "operations": [op]}]
            }),
        )
        .unwrap();
    }
    let acl = h.engine.permissions(&alice(), "/p").unwrap();
    let bob_entry = acl.permissions.iter().find(|e| e.actor == bob()).unwrap();
    assert_eq!(bob_entry.operations, [PermissionOperation::Read, PermissionOperation::Write]);

    h.engine.delete_permissions(&alice(), "/p", &bob()).unwrap();
    assert!(matches!(h.engine.get(&bob(), "/p"), Err(ServiceError::Unauthorized(_))));
    assert_eq!(h.audit_codes().last().unwrap(), &["acl_delete", "acl_delete"]);
    assert!(matches!(
        h.engine.delete_permissions(&alice(), "/p", &bob()),
        Err(ServiceError::NotFound(_))
    ));
}

#[test]
fn actors_cannot_edit_their_own_entry() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    let err = h
        .add_permissions(
            &alice(),
            json!({
                "credential_name": "/p",
                "permissions": [{"actor": "uaa-user:alice", "operations": ["read"]}]
            }),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationFailed(_)));
    assert!(matches!(
        h.engine.delete_permissions(&alice(), "/p", &alice()),
        Err(ServiceError::ValidationFailed(_))
    ));
}

#[test]
fn additional_permissions_on_generate() {
    let h = harness();
    h.generate(
        &alice(),
        json!({
            "name": "/p",
            "type": "password",
            "additional_permissions": [{"actor": "uaa-user:bob", "operations": ["read", "delete"]}]
        }),
    )
    .unwrap();
    assert!(h.engine.get(&bob(), "/p").is_ok());

    // Read and delete do not let bob rewrite or re-grant.
    let err = h
        .generate(
            &bob(),
            json!({
                "name": "/p",
                "type": "password",
                "additional_permissions": [{"actor": "uaa-user:carol", "operations": ["read"]}]
            }),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
    assert!(h.engine.get(&Actor::new("uaa-user:carol"), "/p").is_err());

    h.engine.delete(&bob(), "/p").unwrap();
    assert!(matches!(h.engine.get(&alice(), "/p"), Err(ServiceError::NotFound(_))));
}

#[test]
fn delete_removes_versions_and_acl() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    h.generate(&alice(), json!({"name": "/p", "type": "password", "overwrite": true}))
        .unwrap();
    h.engine.delete(&alice(), "/p").unwrap();

    assert_eq!(h.store.version_count("/p"), 0);
    assert!(matches!(h.engine.permissions(&alice(), "/p"), Err(ServiceError::NotFound(_))));
    assert_eq!(h.audit_codes().last().unwrap(), &["credential_delete"]);

    // A new credential under the same name starts a fresh ACL.
    h.generate(&bob(), json!({"name": "/p", "type": "ssh"})).unwrap();
    assert!(matches!(h.engine.get(&alice(), "/p"), Err(ServiceError::Unauthorized(_))));
}

#[test]
fn signing_ca_requires_read_permission() {
    let h = harness();
    h.generate(
        &alice(),
        json!({
            "name": "/ca",
            "type": "certificate",
            "parameters": {"common_name": "ca", "is_ca": true}
        }),
    )
    .unwrap();
    let err = h
        .generate(
            &bob(),
            json!({
                "name": "/leaf",
                "type": "certificate",
                "parameters": {"common_name": "leaf", "ca": "/ca"}
            }),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::GenerationFailed(ref m) if m.contains("not found")));
    assert_eq!(h.store.version_count("/leaf"), 0);
}

#[test]
fn set_permissions_replaces_the_entry() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    h.add_permissions(
        &alice(),
        json!({
            "credential_name": "/p",
            "permissions": [{"actor": "uaa-user:bob", "operations": ["read", "write"]}]
        }),
    )
    .unwrap();

    let entry = h
        .engine
        .set_permissions(&alice(), "/p", &bob(), &[PermissionOperation::Read])
        .unwrap();
    assert_eq!(entry.operations, [PermissionOperation::Read]);
    assert_eq!(h.audit_codes().last().unwrap(), &["acl_update"]);

    assert!(h.engine.get(&bob(), "/p").is_ok());
    assert!(matches!(
        h.generate(&bob(), json!({"name": "/p", "type": "password", "overwrite": true})),
        Err(ServiceError::Unauthorized(_))
    ));
}

#[test]
fn set_permissions_requires_write_acl_and_operations() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    h.engine
        .set_permissions(&alice(), "/p", &bob(), &[PermissionOperation::Read])
        .unwrap();
    let before = h.store.audit_records().len();

    let carol = Actor::new("uaa-user:carol");
    assert!(matches!(
        h.engine.set_permissions(&bob(), "/p", &carol, &[PermissionOperation::Read]),
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.set_permissions(&alice(), "/p", &carol, &[]),
        Err(ServiceError::ValidationFailed(_))
    ));
    assert!(matches!(
        h.engine.set_permissions(&alice(), "/p", &alice(), &[PermissionOperation::Read]),
        Err(ServiceError::ValidationFailed(_))
    ));
    assert!(matches!(
        h.engine.set_permissions(&alice(), "/absent", &carol, &[PermissionOperation::Read]),
        Err(ServiceError::NotFound(_))
    ));
    assert_eq!(h.store.audit_records().len(), before);
}

#[test]
fn single_entry_read_is_audited() {
    let h = harness();
    h.generate(&alice(), json!({"name": "/p", "type": "password"})).unwrap();
    h.engine
        .set_permissions(&alice(), "/p", &bob(), &[PermissionOperation::Read])
        .unwrap();

    let entry = h.engine.permission(&alice(), "/P", &bob()).unwrap();
    assert_eq!(entry.actor, bob());
    assert_eq!(entry.operations, [PermissionOperation::Read]);
    assert_eq!(h.audit_codes().last().unwrap(), &["acl_access"]);

    assert!(matches!(
        h.engine.permission(&bob(), "/p", &alice()),
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.permission(&alice(), "/p", &Actor::new("uaa-user:carol")),
        Err(ServiceError::NotFound(_))
    ));
}
