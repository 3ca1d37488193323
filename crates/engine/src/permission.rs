//! Access control: per-credential ACL entries, authorization and grants.

use std::collections::BTreeSet;

use common::protocol::{PermissionEntry, PermissionsView};
use common::{Actor, PermissionOperation, ServiceError};
use tracing::{debug, warn};

use crate::audit::AuditRecorder;
use crate::store::PermissionStore;

/// Operations one actor holds on one credential name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControlEntry {
    pub credential_name: String,
    pub actor: Actor,
    pub operations: BTreeSet<PermissionOperation>,
}

impl AccessControlEntry {
    pub fn new(
        credential_name: impl Into<String>,
        actor: Actor,
        operations: impl IntoIterator<Item = PermissionOperation>,
    ) -> Self {
        Self {
            credential_name: credential_name.into(),
            actor,
            operations: operations.into_iter().collect(),
        }
    }

    pub fn allows(&self, operation: PermissionOperation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn to_wire(&self) -> PermissionEntry {
        PermissionEntry {
            actor: self.actor.clone(),
            operations: self.operations.iter().copied().collect(),
        }
    }
}

/// Check that `actor` holds `operation` on `name`.
///
/// # Errors
///
/// [`ServiceError::Unauthorized`] when the actor has no entry or the entry
/// lacks the operation.
pub fn authorize<S: PermissionStore + ?Sized>(
    store: &mut S,
    name: &str,
    actor: &Actor,
    operation: PermissionOperation,
) -> Result<(), ServiceError> {
    let allowed = store
        .find_permission(name, actor)?
        .is_some_and(|entry| entry.allows(operation));
    if allowed {
        Ok(())
    } else {
        warn!(name = %name, actor = %actor, operation = %operation, "request denied");
        Err(ServiceError::Unauthorized(format!(
            "{actor} does not have {operation} permission on {name}"
        )))
    }
}

/// Whether `actor` holds `operation` on `name`, without failing or logging.
pub fn is_allowed<S: PermissionStore + ?Sized>(
    store: &mut S,
    name: &str,
    actor: &Actor,
    operation: PermissionOperation,
) -> Result<bool, ServiceError> {
    Ok(store
        .find_permission(name, actor)?
        .is_some_and(|entry| entry.allows(operation)))
}

/// Merge `operations` into `actor`'s entry on `name`, recording one
/// `acl_update` per operation in canonical order.
pub fn grant<S: PermissionStore + ?Sized>(
    store: &mut S,
    audit: &mut AuditRecorder,
    name: &str,
    actor: &Actor,
    operations: &[PermissionOperation],
) -> Result<(), ServiceError> {
    let mut entry = store
        .find_permission(name, actor)?
        .unwrap_or_else(|| AccessControlEntry::new(name, actor.clone(), []));
    for operation in PermissionOperation::ALL {
        if operations.contains(&operation) {
            entry.operations.insert(operation);
            audit.acl_update(name, actor, operation);
        }
    }
    debug!(name = %name, actor = %actor, ?operations, "permissions granted");
    store.save_permission(entry)?;
    Ok(())
}

/// Overwrite `actor`'s entry on `name` with exactly `operations`, recording
/// one `acl_update` per operation in the new set.
pub fn replace<S: PermissionStore + ?Sized>(
    store: &mut S,
    audit: &mut AuditRecorder,
    name: &str,
    actor: &Actor,
    operations: &[PermissionOperation],
) -> Result<(), ServiceError> {
    let entry = AccessControlEntry::new(name, actor.clone(), operations.iter().copied());
    for operation in &entry.operations {
        audit.acl_update(name, actor, *operation);
    }
    debug!(name = %name, actor = %actor, ?operations, "permissions replaced");
    store.save_permission(entry)?;
    Ok(())
}

/// Give the creator of `name` every operation.
pub fn grant_creator<S: PermissionStore + ?Sized>(
    store: &mut S,
    audit: &mut AuditRecorder,
    name: &str,
    creator: &Actor,
) -> Result<(), ServiceError> {
    grant(store, audit, name, creator, &PermissionOperation::ALL)
}

/// Reject malformed grant lists before anything is written.
///
/// # Errors
///
/// [`ServiceError::ValidationFailed`] for an entry naming `granter` itself or
/// carrying no operations.
pub fn validate_entries(granter: &Actor, entries: &[PermissionEntry]) -> Result<(), ServiceError> {
    for entry in entries {
        if &entry.actor == granter {
            return Err(ServiceError::ValidationFailed(
                "an actor cannot modify their own permissions".into(),
            ));
        }
        if entry.operations.is_empty() {
            return Err(ServiceError::ValidationFailed(format!(
                "no operations given for {}",
                entry.actor
            )));
        }
    }
    Ok(())
}

/// Apply every entry of a grant list to `name`.
pub fn grant_entries<S: PermissionStore + ?Sized>(
    store: &mut S,
    audit: &mut AuditRecorder,
    name: &str,
    entries: &[PermissionEntry],
) -> Result<(), ServiceError> {
    for entry in entries {
        grant(store, audit, name, &entry.actor, &entry.operations)?;
    }
    Ok(())
}

/// Remove `actor`'s entry on `name`, recording one `acl_delete` per
/// operation it held.
///
/// # Errors
///
/// [`ServiceError::NotFound`] when the actor has no entry.
pub fn revoke<S: PermissionStore + ?Sized>(
    store: &mut S,
    audit: &mut AuditRecorder,
    name: &str,
    actor: &Actor,
) -> Result<(), ServiceError> {
    let removed = store
        .delete_permission(name, actor)?
        .ok_or_else(|| ServiceError::NotFound(format!("no permissions for {actor} on {name}")))?;
    for operation in removed.operations {
        audit.acl_delete(name, actor, operation);
    }
    Ok(())
}

/// `actor`'s entry on `name` in wire form.
///
/// # Errors
///
/// [`ServiceError::NotFound`] when the actor has no entry.
pub fn entry<S: PermissionStore + ?Sized>(
    store: &mut S,
    name: &str,
    actor: &Actor,
) -> Result<PermissionEntry, ServiceError> {
    store
        .find_permission(name, actor)?
        .map(|entry| entry.to_wire())
        .ok_or_else(|| ServiceError::NotFound(format!("no permissions for {actor} on {name}")))
}

/// The full ACL of `name` in wire form.
pub fn view<S: PermissionStore + ?Sized>(
    store: &mut S,
    name: &str,
) -> Result<PermissionsView, ServiceError> {
    Ok(PermissionsView {
        credential_name: name.to_owned(),
        permissions: store
            .find_permissions(name)?
            .iter()
            .map(AccessControlEntry::to_wire)
            .collect(),
    })
}
