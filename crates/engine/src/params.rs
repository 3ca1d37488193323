//! Type-specific generation parameters.
//!
//! Parameters are normalized when parsed: absent fields take their defaults,
//! order-insensitive lists are sorted and deduplicated, and names are put in
//! canonical form. Two normalized parameter sets are equivalent exactly when
//! they compare equal, which is what convergence relies on.

use common::{CredentialType, ServiceError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::credential::normalize_name;

pub const DEFAULT_PASSWORD_LENGTH: usize = 30;
pub const MIN_PASSWORD_LENGTH: usize = 4;
pub const MAX_PASSWORD_LENGTH: usize = 200;

pub const DEFAULT_KEY_LENGTH: u32 = 2048;
pub const VALID_KEY_LENGTHS: [u32; 3] = [2048, 3072, 4096];

pub const DEFAULT_CERTIFICATE_DURATION_DAYS: u32 = 365;
pub const MAX_CERTIFICATE_DURATION_DAYS: u32 = 3650;

/// Errors produced while parsing or validating generation parameters.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("invalid {0} parameters: {1}")]
    Malformed(CredentialType, String),

    #[error("the combination of parameters excludes every character class")]
    ExcludesAllCharsets,

    #[error(
        "password length must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH}, got {0}"
    )]
    InvalidLength(usize),

    #[error("key length must be one of 2048, 3072 or 4096, got {0}")]
    InvalidKeyLength(u32),

    #[error(
        "certificate duration must be between 1 and {MAX_CERTIFICATE_DURATION_DAYS} days, got {0}"
    )]
    InvalidDuration(u32),

    #[error("a certificate requires a common name")]
    MissingCommonName,

    #[error("a certificate must be self-signed, a CA, or signed by a named CA")]
    MissingSigningMode,

    #[error("a certificate cannot be both self-signed and signed by a CA")]
    ConflictingSigningMode,

    #[error("invalid alternative name: {0:?}")]
    InvalidAlternativeName(String),

    #[error("country must be a two-letter code, got {0:?}")]
    InvalidCountry(String),

    #[error("username is only valid for user credentials")]
    UsernameNotAllowed,

    #[error("username must not be empty")]
    EmptyUsername,
}

impl From<ParameterError> for ServiceError {
    fn from(e: ParameterError) -> Self {
        ServiceError::ValidationFailed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Password / user
// ---------------------------------------------------------------------------

/// Parameters for password and user credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringGenerationParameters {
    #[serde(default = "default_password_length")]
    pub length: usize,
    #[serde(default)]
    pub exclude_upper: bool,
    #[serde(default)]
    pub exclude_lower: bool,
    #[serde(default)]
    pub exclude_number: bool,
    #[serde(default)]
    pub include_special: bool,
    /// User credentials only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

fn default_password_length() -> usize {
    DEFAULT_PASSWORD_LENGTH
}

impl Default for StringGenerationParameters {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            exclude_upper: false,
            exclude_lower: false,
            exclude_number: false,
            include_special: false,
            username: None,
        }
    }
}

impl StringGenerationParameters {
    fn validate(&self) -> Result<(), ParameterError> {
        if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&self.length) {
            return Err(ParameterError::InvalidLength(self.length));
        }
        if self.exclude_upper
            && self.exclude_lower
            && self.exclude_number
            && !self.include_special
        {
            return Err(ParameterError::ExcludesAllCharsets);
        }
        if matches!(&self.username, Some(u) if u.trim().is_empty()) {
            return Err(ParameterError::EmptyUsername);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    Timestamping,
}

/// Parameters for certificate credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateGenerationParameters {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub alternative_names: Vec<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub organization_unit: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_key_length")]
    pub key_length: u32,
    #[serde(default = "default_duration")]
    pub duration: u32,
    /// Name of the certificate credential that signs this one.
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub self_sign: bool,
    #[serde(default)]
    pub is_ca: bool,
    #[serde(default)]
    pub key_usage: Vec<KeyUsage>,
    #[serde(default)]
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
}

fn default_key_length() -> u32 {
    DEFAULT_KEY_LENGTH
}

fn default_duration() -> u32 {
    DEFAULT_CERTIFICATE_DURATION_DAYS
}

impl CertificateGenerationParameters {
    /// A certificate signs itself when it names no CA.
    pub fn is_self_signed(&self) -> bool {
        self.ca.is_none()
    }

    fn with_ca_key(&self) -> Self {
        let mut canonical = self.clone();
        canonical.ca = canonical.ca.map(|name| name.to_ascii_lowercase());
        canonical
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.common_name,
            &mut self.organization,
            &mut self.organization_unit,
            &mut self.locality,
            &mut self.state,
            &mut self.country,
        ] {
            *field = field.take().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        }
        self.ca = self.ca.take().filter(|c| !c.trim().is_empty()).map(|c| normalize_name(&c));
        self.alternative_names = self
            .alternative_names
            .iter()
            .map(|n| n.trim().to_owned())
            .collect();
        self.alternative_names.sort();
        self.alternative_names.dedup();
        self.key_usage.sort();
        self.key_usage.dedup();
        self.extended_key_usage.sort();
        self.extended_key_usage.dedup();
    }

    fn validate(&self) -> Result<(), ParameterError> {
        if self.common_name.is_none() {
            return Err(ParameterError::MissingCommonName);
        }
        validate_key_length(self.key_length)?;
        if self.duration == 0 || self.duration > MAX_CERTIFICATE_DURATION_DAYS {
            return Err(ParameterError::InvalidDuration(self.duration));
        }
        if self.ca.is_some() && self.self_sign {
            return Err(ParameterError::ConflictingSigningMode);
        }
        if self.ca.is_none() && !self.self_sign && !self.is_ca {
            return Err(ParameterError::MissingSigningMode);
        }
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ParameterError::InvalidCountry(country.clone()));
            }
        }
        for name in &self.alternative_names {
            let is_ip = name.parse::<std::net::IpAddr>().is_ok();
            let is_dns = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '*' | '_'));
            if !is_ip && !is_dns {
                return Err(ParameterError::InvalidAlternativeName(name.clone()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SSH / RSA
// ---------------------------------------------------------------------------

/// Parameters for SSH credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshGenerationParameters {
    #[serde(default = "default_key_length")]
    pub key_length: u32,
    /// Appended to the OpenSSH public key. Part of equivalence even though it
    /// does not change the key material.
    #[serde(default)]
    pub ssh_comment: String,
}

impl Default for SshGenerationParameters {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
            ssh_comment: String::new(),
        }
    }
}

/// Parameters for RSA credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsaGenerationParameters {
    #[serde(default = "default_key_length")]
    pub key_length: u32,
}

impl Default for RsaGenerationParameters {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
        }
    }
}

fn validate_key_length(key_length: u32) -> Result<(), ParameterError> {
    if VALID_KEY_LENGTHS.contains(&key_length) {
        Ok(())
    } else {
        Err(ParameterError::InvalidKeyLength(key_length))
    }
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

/// Normalized generation parameters for one credential type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GenerationParameters {
    Password(StringGenerationParameters),
    User(StringGenerationParameters),
    Certificate(CertificateGenerationParameters),
    Ssh(SshGenerationParameters),
    Rsa(RsaGenerationParameters),
}

impl GenerationParameters {
    /// Parse, default, normalize and validate the raw parameter object of a
    /// request. `None` and JSON `null` both mean "use the defaults".
    ///
    /// # Errors
    ///
    /// Returns a [`ParameterError`] if the object has unknown fields or wrong
    /// types, or if the resulting parameters are invalid or contradictory.
    pub fn parse(
        credential_type: CredentialType,
        raw: Option<serde_json::Value>,
    ) -> Result<Self, ParameterError> {
        let raw = match raw {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(v) => v,
        };
        let params = match credential_type {
            CredentialType::Password => {
                GenerationParameters::Password(from_raw(credential_type, raw)?)
            }
            CredentialType::User => GenerationParameters::User(from_raw(credential_type, raw)?),
            CredentialType::Certificate => {
                let mut p: CertificateGenerationParameters = from_raw(credential_type, raw)?;
                p.normalize();
                GenerationParameters::Certificate(p)
            }
            CredentialType::Ssh => {
                let mut p: SshGenerationParameters = from_raw(credential_type, raw)?;
                p.ssh_comment = p.ssh_comment.trim().to_owned();
                GenerationParameters::Ssh(p)
            }
            CredentialType::Rsa => GenerationParameters::Rsa(from_raw(credential_type, raw)?),
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), ParameterError> {
        match self {
            GenerationParameters::Password(p) => {
                if p.username.is_some() {
                    return Err(ParameterError::UsernameNotAllowed);
                }
                p.validate()
            }
            GenerationParameters::User(p) => p.validate(),
            GenerationParameters::Certificate(p) => p.validate(),
            GenerationParameters::Ssh(p) => validate_key_length(p.key_length),
            GenerationParameters::Rsa(p) => validate_key_length(p.key_length),
        }
    }

    pub fn credential_type(&self) -> CredentialType {
        match self {
            GenerationParameters::Password(_) => CredentialType::Password,
            GenerationParameters::User(_) => CredentialType::User,
            GenerationParameters::Certificate(_) => CredentialType::Certificate,
            GenerationParameters::Ssh(_) => CredentialType::Ssh,
            GenerationParameters::Rsa(_) => CredentialType::Rsa,
        }
    }

    /// Fill in a user credential's username when the request names none.
    ///
    /// A username, once set on a version, is part of that credential's
    /// identity: omitting it means "keep the existing one". No-op for other
    /// types or when a username is already present.
    pub fn with_default_username(mut self, username: Option<&str>) -> Self {
        if let (GenerationParameters::User(p), Some(existing)) = (&mut self, username) {
            if p.username.is_none() {
                p.username = Some(existing.to_owned());
            }
        }
        self
    }

    /// Whether `other` would generate the same kind of value.
    ///
    /// Signing CA names are compared the way credential names are looked up,
    /// ignoring case.
    pub fn is_equivalent(&self, other: &GenerationParameters) -> bool {
        match (self, other) {
            (GenerationParameters::Certificate(a), GenerationParameters::Certificate(b)) => {
                a.with_ca_key() == b.with_ca_key()
            }
            _ => self == other,
        }
    }
}

fn from_raw<T: DeserializeOwned>(
    credential_type: CredentialType,
    raw: serde_json::Value,
) -> Result<T, ParameterError> {
    serde_json::from_value(raw)
        .map_err(|e| ParameterError::Malformed(credential_type, e.to_string()))
}
