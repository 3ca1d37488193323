//! Random password generation.

use common::{CredentialType, CredentialValue};
use rand::{rngs::OsRng, seq::SliceRandom, Rng};

use super::{wrong_parameters, CredentialGenerator, GenerationContext, GenerationError};
use crate::params::{GenerationParameters, StringGenerationParameters};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Generate a password honoring `params`.
///
/// The result contains at least one character from every included class;
/// the remaining positions are drawn uniformly from the union of the classes.
///
/// # Errors
///
/// Fails if the parameters exclude every character class or ask for fewer
/// characters than there are included classes.
pub fn generate_password(params: &StringGenerationParameters) -> Result<String, GenerationError> {
    let classes: Vec<&[u8]> = [
        (!params.exclude_upper, UPPER),
        (!params.exclude_lower, LOWER),
        (!params.exclude_number, DIGITS),
        (params.include_special, SPECIAL),
    ]
    .into_iter()
    .filter_map(|(included, class)| included.then_some(class))
    .collect();

    if classes.is_empty() {
        return Err(GenerationError::new("no character classes left to generate from"));
    }
    if params.length < classes.len() {
        return Err(GenerationError::new(format!(
            "a password of {} characters cannot include {} character classes",
            params.length,
            classes.len()
        )));
    }

    let mut rng = OsRng;
    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    let pool = classes.concat();
    while chars.len() < params.length {
        chars.push(pool[rng.gen_range(0..pool.len())]);
    }
    chars.shuffle(&mut rng);

    String::from_utf8(chars).map_err(|e| GenerationError::new(e.to_string()))
}

/// Generator for `password` credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordGenerator;

impl CredentialGenerator for PasswordGenerator {
    fn generate(
        &self,
        parameters: &GenerationParameters,
        _ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError> {
        match parameters {
            GenerationParameters::Password(p) => {
                Ok(CredentialValue::Password(generate_password(p)?))
            }
            other => Err(wrong_parameters(CredentialType::Password, other)),
        }
    }
}
