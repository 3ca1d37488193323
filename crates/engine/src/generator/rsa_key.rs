//! Raw RSA key pair generation.

use common::types::RsaValue;
use common::{CredentialType, CredentialValue};

use super::keys::{generate_rsa_key, pkcs1_private_pem, spki_public_pem};
use super::{wrong_parameters, CredentialGenerator, GenerationContext, GenerationError};
use crate::params::GenerationParameters;

/// Generator for `rsa` credentials: SPKI public key, PKCS#1 private key.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaGenerator;

impl CredentialGenerator for RsaGenerator {
    fn generate(
        &self,
        parameters: &GenerationParameters,
        _ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError> {
        let GenerationParameters::Rsa(params) = parameters else {
            return Err(wrong_parameters(CredentialType::Rsa, parameters));
        };
        let key = generate_rsa_key(params.key_length)?;
        Ok(CredentialValue::Rsa(RsaValue {
            public_key: spki_public_pem(&key.to_public_key())?,
            private_key: pkcs1_private_pem(&key)?,
        }))
    }
}
