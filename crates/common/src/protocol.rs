//! Request and response types exchanged between the engine and its callers.
//!
//! The API layer is expected to map its transport-level requests onto these
//! shapes unchanged. The bundled driver binary reads them as JSON lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Actor, CredentialType, CredentialValue, PermissionOperation};

// ---------------------------------------------------------------------------
// Credential requests
// ---------------------------------------------------------------------------

/// Body of a generate request.
///
/// `parameters` is the type-specific generation parameter object, or `null`
/// to use the type's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// User credentials only: the username may be supplied here instead of in
    /// `parameters`.
    #[serde(default)]
    pub value: Option<UsernameValue>,
    #[serde(default)]
    pub additional_permissions: Vec<PermissionEntry>,
}

/// `{"username": ...}` carried by user generate requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsernameValue {
    #[serde(default)]
    pub username: Option<String>,
}

/// Body of a set request: store a caller-supplied value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub overwrite: bool,
    pub value: serde_json::Value,
    #[serde(default)]
    pub additional_permissions: Vec<PermissionEntry>,
}

// ---------------------------------------------------------------------------
// Permission requests
// ---------------------------------------------------------------------------

/// One actor's operations, as sent and returned on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub actor: Actor,
    pub operations: Vec<PermissionOperation>,
}

/// Body of an add-permissions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsRequest {
    pub credential_name: String,
    pub permissions: Vec<PermissionEntry>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One credential version as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialView {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    pub value: CredentialValue,
    pub version_created_at: DateTime<Utc>,
}

/// A list of versions of one credential, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialsView {
    pub data: Vec<CredentialView>,
}

/// The ACL of one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsView {
    pub credential_name: String,
    pub permissions: Vec<PermissionEntry>,
}

/// Standard error response body returned on any failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"validation_failed"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(e: &crate::ServiceError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Driver commands
// ---------------------------------------------------------------------------

/// One line of driver input: the acting identity plus the operation.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub actor: Actor,
    #[serde(flatten)]
    pub command: Command,
}

/// Every engine operation reachable through the driver, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Generate(GenerateRequest),
    Set(SetRequest),
    Get { name: String },
    GetById { id: Uuid },
    Versions { name: String },
    Regenerate { name: String },
    Delete { name: String },
    GetPermissions {
        credential_name: String,
    },
    /// A single `(credential_name, target_actor)` entry.
    GetPermission {
        credential_name: String,
        target_actor: Actor,
    },
    /// Merges into existing entries.
    AddPermissions(PermissionsRequest),
    /// Overwrites the target's entry with exactly `operations`.
    SetPermissions {
        credential_name: String,
        target_actor: Actor,
        operations: Vec<PermissionOperation>,
    },
    /// `target_actor` names whose entry is removed; `actor` on the envelope is the caller.
    DeletePermissions {
        credential_name: String,
        target_actor: Actor,
    },
    RotateEncryptionKeys,
}

/// One line of driver output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Ok(serde_json::Value),
    Error(ErrorResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generate_request_defaults() {
        let req: GenerateRequest =
            serde_json::from_value(json!({"name": "/k", "type": "SSH"})).unwrap();
        assert_eq!(req.credential_type, CredentialType::Ssh);
        assert!(!req.overwrite);
        assert!(req.parameters.is_none());
        assert!(req.additional_permissions.is_empty());
    }

    #[test]
    fn null_parameters_are_absent() {
        let req: GenerateRequest = serde_json::from_value(
            json!({"name": "/p", "type": "password", "parameters": null, "overwrite": true}),
        )
        .unwrap();
        assert!(req.parameters.is_none());
        assert!(req.overwrite);
    }

    #[test]
    fn credential_view_shape() {
        let view = CredentialView {
            id: Uuid::nil(),
            name: "/u".into(),
            credential_type: CredentialType::User,
            value: CredentialValue::User(crate::types::UserValue {
                username: "admin".into(),
                password: "pw".into(),
            }),
            version_created_at: DateTime::from_timestamp(1_400_011_001, 0).unwrap(),
        };
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["type"], "user");
        assert_eq!(v["value"]["username"], "admin");
        assert_eq!(v["version_created_at"], "2014-05-13T19:56:41Z");
    }

    #[test]
    fn command_envelope_parses_tagged_op() {
        let env: CommandEnvelope = serde_json::from_value(json!({
            "actor": "uaa-user:alice",
            "op": "generate",
            "name": "/k",
            "type": "rsa",
            "parameters": {"key_length": 4096}
        }))
        .unwrap();
        assert_eq!(env.actor.as_str(), "uaa-user:alice");
        match env.command {
            Command::Generate(req) => assert_eq!(req.parameters.unwrap()["key_length"], 4096),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn delete_permissions_keeps_caller_and_target_apart() {
        let env: CommandEnvelope = serde_json::from_value(json!({
            "actor": "uaa-user:alice",
            "op": "delete_permissions",
            "credential_name": "/k",
            "target_actor": "uaa-user:bob"
        }))
        .unwrap();
        assert_eq!(env.actor.as_str(), "uaa-user:alice");
        match env.command {
            Command::DeletePermissions { target_actor, .. } => {
                assert_eq!(target_actor.as_str(), "uaa-user:bob")
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn set_permissions_carries_the_full_operation_set() {
        let env: CommandEnvelope = serde_json::from_value(json!({
            "actor": "uaa-user:alice",
            "op": "set_permissions",
            "credential_name": "/k",
            "target_actor": "uaa-user:bob",
            "operations": ["read", "write_acl"]
        }))
        .unwrap();
        match env.command {
            Command::SetPermissions {
                target_actor,
                operations,
                ..
            } => {
                assert_eq!(target_actor.as_str(), "uaa-user:bob");
                assert_eq!(
                    operations,
                    [PermissionOperation::Read, PermissionOperation::WriteAcl]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn outcome_is_externally_tagged() {
        let out = CommandOutcome::Error(ErrorResponse::new("not_found", "missing"));
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["error"]["code"], "not_found");
    }
}
