//! Core vocabulary shared by the engine and its callers: credential types,
//! permission operations, acting identities and credential values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Opaque acting identity supplied by the authentication layer.
///
/// The engine never interprets it; it is only a key for permission entries and
/// audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Credential type
// ---------------------------------------------------------------------------

/// The five supported credential types. Fixed for every version of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum CredentialType {
    Password,
    User,
    Certificate,
    Ssh,
    Rsa,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialType::Password => "password",
            CredentialType::User => "user",
            CredentialType::Certificate => "certificate",
            CredentialType::Ssh => "ssh",
            CredentialType::Rsa => "rsa",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a type name in any casing (`"SSH"`, `"Ssh"`, `"ssh"`).
impl FromStr for CredentialType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "password" => Ok(CredentialType::Password),
            "user" => Ok(CredentialType::User),
            "certificate" => Ok(CredentialType::Certificate),
            "ssh" => Ok(CredentialType::Ssh),
            "rsa" => Ok(CredentialType::Rsa),
            other => Err(ServiceError::ValidationFailed(format!(
                "unsupported credential type: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for CredentialType {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Permission operations
// ---------------------------------------------------------------------------

/// An operation an ACL entry can grant on a credential name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOperation {
    Read,
    Write,
    Delete,
    ReadAcl,
    WriteAcl,
}

impl PermissionOperation {
    /// Every operation, in the order they are granted to a credential's creator.
    pub const ALL: [PermissionOperation; 5] = [
        PermissionOperation::Read,
        PermissionOperation::Write,
        PermissionOperation::Delete,
        PermissionOperation::ReadAcl,
        PermissionOperation::WriteAcl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionOperation::Read => "read",
            PermissionOperation::Write => "write",
            PermissionOperation::Delete => "delete",
            PermissionOperation::ReadAcl => "read_acl",
            PermissionOperation::WriteAcl => "write_acl",
        }
    }
}

impl fmt::Display for PermissionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Credential values
// ---------------------------------------------------------------------------

/// `{username, password}` value of a user credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserValue {
    pub username: String,
    pub password: String,
}

/// `{ca, certificate, private_key}` value of a certificate credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValue {
    #[serde(default)]
    pub ca: Option<String>,
    pub certificate: String,
    pub private_key: String,
}

/// `{public_key, private_key, public_key_fingerprint}` value of an SSH credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshValue {
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub public_key_fingerprint: Option<String>,
}

/// `{public_key, private_key}` value of an RSA credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaValue {
    pub public_key: String,
    pub private_key: String,
}

/// A decrypted credential value; its JSON shape depends on the type.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CredentialValue {
    Password(String),
    User(UserValue),
    Certificate(CertificateValue),
    Ssh(SshValue),
    Rsa(RsaValue),
}

impl CredentialValue {
    pub fn credential_type(&self) -> CredentialType {
        match self {
            CredentialValue::Password(_) => CredentialType::Password,
            CredentialValue::User(_) => CredentialType::User,
            CredentialValue::Certificate(_) => CredentialType::Certificate,
            CredentialValue::Ssh(_) => CredentialType::Ssh,
            CredentialValue::Rsa(_) => CredentialType::Rsa,
        }
    }

    /// Interpret a caller-supplied JSON value as a value of `credential_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ValidationFailed`] if the JSON does not have the
    /// shape required by the type or a required field is empty.
    pub fn from_json(
        credential_type: CredentialType,
        json: serde_json::Value,
    ) -> Result<Self, ServiceError> {
        let invalid = |e: serde_json::Error| {
            ServiceError::ValidationFailed(format!("invalid {credential_type} value: {e}"))
        };
        let value = match credential_type {
            CredentialType::Password => {
                CredentialValue::Password(serde_json::from_value(json).map_err(invalid)?)
            }
            CredentialType::User => {
                CredentialValue::User(serde_json::from_value(json).map_err(invalid)?)
            }
            CredentialType::Certificate => {
                CredentialValue::Certificate(serde_json::from_value(json).map_err(invalid)?)
            }
            CredentialType::Ssh => {
                CredentialValue::Ssh(serde_json::from_value(json).map_err(invalid)?)
            }
            CredentialType::Rsa => {
                CredentialValue::Rsa(serde_json::from_value(json).map_err(invalid)?)
            }
        };
        if value.secret().is_empty() {
            return Err(ServiceError::ValidationFailed(format!(
                "{credential_type} value must not be empty"
            )));
        }
        Ok(value)
    }

    /// The portion of the value that is sealed at rest.
    pub fn secret(&self) -> &str {
        match self {
            CredentialValue::Password(p) => p,
            CredentialValue::User(u) => &u.password,
            CredentialValue::Certificate(c) => &c.private_key,
            CredentialValue::Ssh(s) => &s.private_key,
            CredentialValue::Rsa(r) => &r.private_key,
        }
    }
}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material never reaches logs, not even in debug builds.
        match self {
            CredentialValue::Password(_) => f.write_str("Password([REDACTED])"),
            CredentialValue::User(u) => f
                .debug_struct("User")
                .field("username", &u.username)
                .field("password", &"[REDACTED]")
                .finish(),
            CredentialValue::Certificate(_) => f.write_str("Certificate([REDACTED])"),
            CredentialValue::Ssh(s) => f
                .debug_struct("Ssh")
                .field("public_key", &s.public_key)
                .field("private_key", &"[REDACTED]")
                .finish(),
            CredentialValue::Rsa(r) => f
                .debug_struct("Rsa")
                .field("public_key", &r.public_key)
                .field("private_key", &"[REDACTED]")
                .finish(),
        }
    }
}
