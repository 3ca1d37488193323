//! The credential model: one immutable version of a named credential.
//!
//! Every version carries its secret portion sealed by an
//! [`EncryptionProvider`] and its non-sensitive metadata (public keys,
//! certificates, usernames, generation parameters) in clear. Decryption is
//! only available through [`CredentialVersion::value`], which takes the
//! provider explicitly.

use chrono::{DateTime, Utc};
use common::protocol::CredentialView;
use common::types::{CertificateValue, RsaValue, SshValue, UserValue};
use common::{CredentialType, CredentialValue, ServiceError};
use uuid::Uuid;

use crate::crypto::{EncryptedValue, EncryptionProvider};
use crate::params::{
    CertificateGenerationParameters, GenerationParameters, RsaGenerationParameters,
    SshGenerationParameters, StringGenerationParameters,
};

/// Longest accepted credential name, in bytes.
pub const MAX_NAME_LENGTH: usize = 1024;

/// Put a credential name in canonical form: trimmed, with a leading `/`.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

/// Normalize `name` and check that it is a well-formed hierarchical path.
///
/// # Errors
///
/// Returns [`ServiceError::ValidationFailed`] for empty names, names with
/// empty segments or a trailing slash, over-long names, or characters outside
/// `[A-Za-z0-9_.:/-]`.
pub fn validate_name(name: &str) -> Result<String, ServiceError> {
    let normalized = normalize_name(name);
    if normalized == "/" {
        return Err(ServiceError::ValidationFailed("credential name must not be empty".into()));
    }
    if normalized.len() > MAX_NAME_LENGTH {
        return Err(ServiceError::ValidationFailed(format!(
            "credential name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if normalized.contains("//") || normalized.ends_with('/') {
        return Err(ServiceError::ValidationFailed(
            "credential name must not contain empty path segments or end with '/'".into(),
        ));
    }
    if let Some(c) = normalized
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')))
    {
        return Err(ServiceError::ValidationFailed(format!(
            "credential name contains invalid character {c:?}"
        )));
    }
    Ok(normalized)
}

/// Type-specific cleartext metadata of a version.
///
/// `parameters` is `Some` when the version was generated and `None` when its
/// value was set explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialData {
    Password {
        parameters: Option<StringGenerationParameters>,
    },
    User {
        username: String,
        parameters: Option<StringGenerationParameters>,
    },
    Certificate {
        certificate: String,
        ca: Option<String>,
        parameters: Option<CertificateGenerationParameters>,
    },
    Ssh {
        public_key: String,
        public_key_fingerprint: Option<String>,
        parameters: Option<SshGenerationParameters>,
    },
    Rsa {
        public_key: String,
        parameters: Option<RsaGenerationParameters>,
    },
}

/// One immutable snapshot of a named credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialVersion {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub encrypted_value: EncryptedValue,
    pub data: CredentialData,
}

impl CredentialVersion {
    /// Seal `value` and build a new version with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if `parameters` belong to a different
    /// type than `value`, or the provider's error if sealing fails.
    pub fn new(
        name: &str,
        value: &CredentialValue,
        parameters: Option<GenerationParameters>,
        created_at: DateTime<Utc>,
        encryptor: &dyn EncryptionProvider,
    ) -> Result<Self, ServiceError> {
        let data = match (value, parameters) {
            (CredentialValue::Password(_), None) => CredentialData::Password { parameters: None },
            (CredentialValue::Password(_), Some(GenerationParameters::Password(p))) => {
                CredentialData::Password { parameters: Some(p) }
            }
            (CredentialValue::User(u), None) => CredentialData::User {
                username: u.username.clone(),
                parameters: None,
            },
            (CredentialValue::User(u), Some(GenerationParameters::User(mut p))) => {
                // The stored parameters carry the username the value really has.
                p.username = Some(u.username.clone());
                CredentialData::User {
                    username: u.username.clone(),
                    parameters: Some(p),
                }
            }
            (CredentialValue::Certificate(c), p) => CredentialData::Certificate {
                certificate: c.certificate.clone(),
                ca: c.ca.clone(),
                parameters: match p {
                    None => None,
                    Some(GenerationParameters::Certificate(p)) => Some(p),
                    Some(other) => return Err(mismatch(value, &other)),
                },
            },
            (CredentialValue::Ssh(s), p) => CredentialData::Ssh {
                public_key: s.public_key.clone(),
                public_key_fingerprint: s.public_key_fingerprint.clone(),
                parameters: match p {
                    None => None,
                    Some(GenerationParameters::Ssh(p)) => Some(p),
                    Some(other) => return Err(mismatch(value, &other)),
                },
            },
            (CredentialValue::Rsa(r), p) => CredentialData::Rsa {
                public_key: r.public_key.clone(),
                parameters: match p {
                    None => None,
                    Some(GenerationParameters::Rsa(p)) => Some(p),
                    Some(other) => return Err(mismatch(value, &other)),
                },
            },
            (_, Some(other)) => return Err(mismatch(value, &other)),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            created_at,
            encrypted_value: encryptor.seal(value.secret().as_bytes())?,
            data,
        })
    }

    pub fn credential_type(&self) -> CredentialType {
        match &self.data {
            CredentialData::Password { .. } => CredentialType::Password,
            CredentialData::User { .. } => CredentialType::User,
            CredentialData::Certificate { .. } => CredentialType::Certificate,
            CredentialData::Ssh { .. } => CredentialType::Ssh,
            CredentialData::Rsa { .. } => CredentialType::Rsa,
        }
    }

    /// The parameters this version was generated with, if it was generated.
    pub fn generation_parameters(&self) -> Option<GenerationParameters> {
        match &self.data {
            CredentialData::Password { parameters } => {
                parameters.clone().map(GenerationParameters::Password)
            }
            CredentialData::User { parameters, .. } => {
                parameters.clone().map(GenerationParameters::User)
            }
            CredentialData::Certificate { parameters, .. } => {
                parameters.clone().map(GenerationParameters::Certificate)
            }
            CredentialData::Ssh { parameters, .. } => {
                parameters.clone().map(GenerationParameters::Ssh)
            }
            CredentialData::Rsa { parameters, .. } => {
                parameters.clone().map(GenerationParameters::Rsa)
            }
        }
    }

    /// Username of a user credential.
    pub fn username(&self) -> Option<&str> {
        match &self.data {
            CredentialData::User { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Decrypt the sealed portion and reassemble the full value.
    ///
    /// # Errors
    ///
    /// Propagates [`ServiceError::EncryptionUnavailable`] /
    /// [`ServiceError::DecryptionFailed`] from the provider, and
    /// [`ServiceError::DecryptionFailed`] if the cleartext is not UTF-8.
    pub fn value(
        &self,
        encryptor: &dyn EncryptionProvider,
    ) -> Result<CredentialValue, ServiceError> {
        let secret = String::from_utf8(encryptor.unseal(&self.encrypted_value)?).map_err(|_| {
            ServiceError::DecryptionFailed(format!(
                "version {} decrypted to invalid UTF-8",
                self.id
            ))
        })?;
        Ok(match &self.data {
            CredentialData::Password { .. } => CredentialValue::Password(secret),
            CredentialData::User { username, .. } => CredentialValue::User(UserValue {
                username: username.clone(),
                password: secret,
            }),
            CredentialData::Certificate { certificate, ca, .. } => {
                CredentialValue::Certificate(CertificateValue {
                    ca: ca.clone(),
                    certificate: certificate.clone(),
                    private_key: secret,
                })
            }
            CredentialData::Ssh {
                public_key,
                public_key_fingerprint,
                ..
            } => CredentialValue::Ssh(SshValue {
                public_key: public_key.clone(),
                private_key: secret,
                public_key_fingerprint: public_key_fingerprint.clone(),
            }),
            CredentialData::Rsa { public_key, .. } => CredentialValue::Rsa(RsaValue {
                public_key: public_key.clone(),
                private_key: secret,
            }),
        })
    }

    /// Re-seal the secret under the provider's active key. The cleartext, id
    /// and timestamp are unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the provider's unseal or seal failure.
    pub fn rotate(&mut self, encryptor: &dyn EncryptionProvider) -> Result<(), ServiceError> {
        let cleartext = encryptor.unseal(&self.encrypted_value)?;
        self.encrypted_value = encryptor.seal(&cleartext)?;
        Ok(())
    }

    /// Decrypt and render the version as a response view.
    ///
    /// # Errors
    ///
    /// See [`CredentialVersion::value`].
    pub fn to_view(
        &self,
        encryptor: &dyn EncryptionProvider,
    ) -> Result<CredentialView, ServiceError> {
        Ok(CredentialView {
            id: self.id,
            name: self.name.clone(),
            credential_type: self.credential_type(),
            value: self.value(encryptor)?,
            version_created_at: self.created_at,
        })
    }
}

fn mismatch(value: &CredentialValue, params: &GenerationParameters) -> ServiceError {
    ServiceError::Internal(format!(
        "{} parameters cannot describe a {} value",
        params.credential_type(),
        value.credential_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionError, Encryptor, KeyRing, MockEncryptionProvider, KEY_LEN};

    fn encryptor() -> Encryptor {
        let ring = KeyRing::new();
        ring.insert("k1", &[7u8; KEY_LEN]).unwrap();
        ring.activate("k1").unwrap();
        Encryptor::new(ring)
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_400_011_000, 0).unwrap()
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(
            validate_name("my-namespace/subTree/credential-name").unwrap(),
            "/my-namespace/subTree/credential-name"
        );
        assert_eq!(validate_name("/k").unwrap(), "/k");
    }

    #[test]
    fn malformed_names_are_rejected() {
        for bad in ["", "/", "/a//b", "/a/", "/a b", "/semi;colon"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        let long = format!("/{}", "a".repeat(MAX_NAME_LENGTH));
        assert!(validate_name(&long).is_err());
    }

    #[test]
    fn secret_is_sealed_and_metadata_is_clear() {
        let enc = encryptor();
        let value = CredentialValue::Rsa(RsaValue {
            public_key: "public_key".into(),
            private_key: "private_key".into(),
        });
        let params = GenerationParameters::Rsa(RsaGenerationParameters { key_length: 4096 });
        let version =
            CredentialVersion::new("/rsa", &value, Some(params.clone()), now(), &enc).unwrap();

        assert_eq!(version.credential_type(), CredentialType::Rsa);
        assert_eq!(version.encrypted_value.key_id, "k1");
        assert_ne!(version.encrypted_value.ciphertext, b"private_key");
        assert_eq!(version.generation_parameters(), Some(params));
        assert_eq!(version.value(&enc).unwrap(), value);
    }

    #[test]
    fn user_parameters_record_actual_username() {
        let enc = encryptor();
        let value = CredentialValue::User(UserValue {
            username: "generated-user".into(),
            password: "generated-credential".into(),
        });
        let params = GenerationParameters::User(StringGenerationParameters::default());
        let version = CredentialVersion::new("/u", &value, Some(params), now(), &enc).unwrap();
        assert_eq!(version.username(), Some("generated-user"));
        match version.generation_parameters() {
            Some(GenerationParameters::User(p)) => {
                assert_eq!(p.username.as_deref(), Some("generated-user"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_parameters_are_rejected() {
        let enc = encryptor();
        let value = CredentialValue::Password("pw".into());
        let params = GenerationParameters::Rsa(RsaGenerationParameters::default());
        assert!(CredentialVersion::new("/p", &value, Some(params), now(), &enc).is_err());
    }

    #[test]
    fn view_carries_version_metadata() {
        let enc = encryptor();
        let value = CredentialValue::Certificate(CertificateValue {
            ca: Some("ca".into()),
            certificate: "certificate".into(),
            private_key: "private_key".into(),
        });
        let version = CredentialVersion::new("/c", &value, None, now(), &enc).unwrap();
        let view = version.to_view(&enc).unwrap();
        assert_eq!(view.id, version.id);
        assert_eq!(view.version_created_at, now());
        assert_eq!(view.credential_type, CredentialType::Certificate);
        assert_eq!(view.value, value);
        assert!(version.generation_parameters().is_none());
    }

    #[test]
    fn rotate_reseals_under_active_key() {
        let enc = encryptor();
        let value = CredentialValue::Password("pw".into());
        let mut version = CredentialVersion::new("/p", &value, None, now(), &enc).unwrap();
        enc.key_ring().insert("k2", &[9u8; KEY_LEN]).unwrap();
        enc.key_ring().activate("k2").unwrap();

        let id = version.id;
        version.rotate(&enc).unwrap();
        assert_eq!(version.encrypted_value.key_id, "k2");
        assert_eq!(version.id, id);
        assert_eq!(version.value(&enc).unwrap(), value);
    }

    #[test]
    fn unavailable_provider_fails_version_creation() {
        let mut provider = MockEncryptionProvider::new();
        provider
            .expect_seal()
            .times(1)
            .returning(|_| Err(EncryptionError::Unavailable("hsm unreachable".into())));
        let value = CredentialValue::Password("pw".into());
        let err = CredentialVersion::new("/p", &value, None, now(), &provider).unwrap_err();
        assert!(matches!(err, ServiceError::EncryptionUnavailable(_)));
    }
}
