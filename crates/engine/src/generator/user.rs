//! Username + password generation.

use common::types::UserValue;
use common::{CredentialType, CredentialValue};

use super::password::generate_password;
use super::{wrong_parameters, CredentialGenerator, GenerationContext, GenerationError};
use crate::params::{GenerationParameters, StringGenerationParameters};

/// Length of generated usernames.
pub const USERNAME_LENGTH: usize = 20;

/// Generator for `user` credentials.
///
/// Keeps an explicit username and generates only the password; otherwise
/// generates a letters-only username too.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserGenerator;

impl CredentialGenerator for UserGenerator {
    fn generate(
        &self,
        parameters: &GenerationParameters,
        _ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError> {
        let GenerationParameters::User(params) = parameters else {
            return Err(wrong_parameters(CredentialType::User, parameters));
        };
        let username = match &params.username {
            Some(username) => username.clone(),
            None => generate_password(&StringGenerationParameters {
                length: USERNAME_LENGTH,
                exclude_number: true,
                ..Default::default()
            })?,
        };
        Ok(CredentialValue::User(UserValue {
            username,
            password: generate_password(params)?,
        }))
    }
}
