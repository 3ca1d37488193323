//! Per-request audit trail.
//!
//! An [`AuditRecorder`] collects the events a request produces, in order. It
//! is turned into a single [`AuditRecord`] and appended inside the same
//! transaction as the mutation it describes, so the trail and the data are
//! visible together or not at all.

use chrono::{DateTime, Utc};
use common::{Actor, PermissionOperation};
use serde::Serialize;
use uuid::Uuid;

/// What an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    CredentialAccess,
    CredentialUpdate,
    CredentialDelete,
    AclAccess,
    AclUpdate,
    AclDelete,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOperation::CredentialAccess => "credential_access",
            AuditOperation::CredentialUpdate => "credential_update",
            AuditOperation::CredentialDelete => "credential_delete",
            AuditOperation::AclAccess => "acl_access",
            AuditOperation::AclUpdate => "acl_update",
            AuditOperation::AclDelete => "acl_delete",
        }
    }
}

/// One effect produced by a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub credential_name: String,
    /// Subject of an ACL event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Operation granted or revoked by an ACL event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_operation: Option<PermissionOperation>,
}

/// All events of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
    pub events: Vec<AuditEvent>,
}

/// Accumulates the events of the request in progress.
#[derive(Debug, Default)]
pub struct AuditRecorder {
    events: Vec<AuditEvent>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credential_access(&mut self, name: &str) {
        self.push(AuditOperation::CredentialAccess, name, None, None);
    }

    pub fn credential_update(&mut self, name: &str) {
        self.push(AuditOperation::CredentialUpdate, name, None, None);
    }

    pub fn credential_delete(&mut self, name: &str) {
        self.push(AuditOperation::CredentialDelete, name, None, None);
    }

    pub fn acl_access(&mut self, name: &str) {
        self.push(AuditOperation::AclAccess, name, None, None);
    }

    pub fn acl_update(&mut self, name: &str, actor: &Actor, operation: PermissionOperation) {
        self.push(AuditOperation::AclUpdate, name, Some(actor.clone()), Some(operation));
    }

    pub fn acl_delete(&mut self, name: &str, actor: &Actor, operation: PermissionOperation) {
        self.push(AuditOperation::AclDelete, name, Some(actor.clone()), Some(operation));
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Close the request's trail.
    pub fn into_record(
        self,
        request_id: Uuid,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    ) -> AuditRecord {
        AuditRecord {
            request_id,
            actor,
            occurred_at,
            events: self.events,
        }
    }

    fn push(
        &mut self,
        operation: AuditOperation,
        name: &str,
        actor: Option<Actor>,
        granted_operation: Option<PermissionOperation>,
    ) {
        self.events.push(AuditEvent {
            operation,
            credential_name: name.to_owned(),
            actor,
            granted_operation,
        });
    }
}
