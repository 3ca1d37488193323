//! Credential value generators, one per credential type.
//!
//! Generators are stateless: they turn normalized [`GenerationParameters`]
//! plus a [`GenerationContext`] into a fresh [`CredentialValue`], or fail
//! with a [`GenerationError`]. They never return partial values and never
//! touch storage; anything they need from the store (the signing CA of a
//! certificate) is resolved by the engine beforehand.

pub mod certificate;
pub mod keys;
pub mod password;
pub mod rsa_key;
pub mod ssh;
pub mod user;

use std::fmt;

use chrono::{DateTime, Utc};
use common::{Actor, CredentialType, CredentialValue, ServiceError};
use thiserror::Error;

use crate::params::GenerationParameters;

pub use certificate::CertificateGenerator;
pub use password::PasswordGenerator;
pub use rsa_key::RsaGenerator;
pub use ssh::SshGenerator;
pub use user::UserGenerator;

/// A generator could not produce a value; carries a human-readable cause.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

impl From<GenerationError> for ServiceError {
    fn from(e: GenerationError) -> Self {
        ServiceError::GenerationFailed(e.0)
    }
}

/// Certificate and key of the CA that signs a generated certificate.
#[derive(Clone)]
pub struct SigningAuthority {
    pub name: String,
    pub certificate: String,
    pub private_key: String,
}

impl fmt::Debug for SigningAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAuthority")
            .field("name", &self.name)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Everything a generator may consult besides its parameters.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub actor: Actor,
    pub now: DateTime<Utc>,
    /// Resolved signing CA, for certificates that name one.
    pub ca: Option<SigningAuthority>,
}

impl GenerationContext {
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        Self { actor, now, ca: None }
    }
}

/// Produces a fresh value from parameters.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialGenerator: Send + Sync {
    fn generate(
        &self,
        parameters: &GenerationParameters,
        ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError>;
}

/// One generator per credential type, dispatched on the parameters' type.
pub struct GeneratorSet {
    password: Box<dyn CredentialGenerator>,
    user: Box<dyn CredentialGenerator>,
    certificate: Box<dyn CredentialGenerator>,
    ssh: Box<dyn CredentialGenerator>,
    rsa: Box<dyn CredentialGenerator>,
}

impl GeneratorSet {
    /// The built-in generators for every type.
    pub fn new() -> Self {
        Self {
            password: Box::new(PasswordGenerator),
            user: Box::new(UserGenerator),
            certificate: Box::new(CertificateGenerator),
            ssh: Box::new(SshGenerator),
            rsa: Box::new(RsaGenerator),
        }
    }

    /// Replace the generator used for `credential_type`.
    pub fn with_generator(
        mut self,
        credential_type: CredentialType,
        generator: impl CredentialGenerator + 'static,
    ) -> Self {
        let slot = match credential_type {
            CredentialType::Password => &mut self.password,
            CredentialType::User => &mut self.user,
            CredentialType::Certificate => &mut self.certificate,
            CredentialType::Ssh => &mut self.ssh,
            CredentialType::Rsa => &mut self.rsa,
        };
        *slot = Box::new(generator);
        self
    }

    /// Generate a value for `parameters` with the matching generator.
    ///
    /// # Errors
    ///
    /// Propagates the generator's failure, and fails if a generator returns a
    /// value of the wrong type.
    pub fn generate(
        &self,
        parameters: &GenerationParameters,
        ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError> {
        let credential_type = parameters.credential_type();
        let generator = match credential_type {
            CredentialType::Password => &self.password,
            CredentialType::User => &self.user,
            CredentialType::Certificate => &self.certificate,
            CredentialType::Ssh => &self.ssh,
            CredentialType::Rsa => &self.rsa,
        };
        let value = generator.generate(parameters, ctx)?;
        if value.credential_type() != credential_type {
            return Err(GenerationError::new(format!(
                "{credential_type} generator produced a {} value",
                value.credential_type()
            )));
        }
        Ok(value)
    }
}

impl Default for GeneratorSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Error for a generator handed another type's parameters.
pub(crate) fn wrong_parameters(
    expected: CredentialType,
    got: &GenerationParameters,
) -> GenerationError {
    GenerationError::new(format!(
        "{expected} generator cannot use {} parameters",
        got.credential_type()
    ))
}
