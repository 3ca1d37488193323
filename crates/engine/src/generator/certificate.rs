//! X.509 certificate generation.
//!
//! Keys come from the `rsa` crate so every supported key length works;
//! rcgen assembles and signs the certificate. A certificate is either
//! self-signed (its own `ca` field then holds itself) or signed by the
//! authority the engine resolved into the [`GenerationContext`].

use chrono::{DateTime, Datelike, Days, Utc};
use common::types::CertificateValue;
use common::{CredentialType, CredentialValue};
use rand::{rngs::OsRng, RngCore};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::{pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, RsaPrivateKey};

use super::keys::{generate_rsa_key, pkcs8_private_pem};
use super::{
    wrong_parameters, CredentialGenerator, GenerationContext, GenerationError, SigningAuthority,
};
use crate::params::{
    CertificateGenerationParameters, ExtendedKeyUsage, GenerationParameters, KeyUsage,
};

const SERIAL_LEN: usize = 16;

/// Generator for `certificate` credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateGenerator;

impl CredentialGenerator for CertificateGenerator {
    fn generate(
        &self,
        parameters: &GenerationParameters,
        ctx: &GenerationContext,
    ) -> Result<CredentialValue, GenerationError> {
        let GenerationParameters::Certificate(params) = parameters else {
            return Err(wrong_parameters(CredentialType::Certificate, parameters));
        };

        let key = generate_rsa_key(params.key_length)?;
        let key_pair = rcgen_key_pair(&key)?;
        let cert_params = certificate_params(params, ctx.now)?;

        let (certificate, ca) = if params.is_self_signed() {
            let cert = cert_params
                .self_signed(&key_pair)
                .map_err(|e| GenerationError::new(format!("certificate signing failed: {e}")))?;
            let pem = cert.pem();
            (pem.clone(), pem)
        } else {
            let name = params.ca.as_deref().unwrap_or_default();
            let authority = ctx
                .ca
                .as_ref()
                .filter(|authority| authority.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| GenerationError::new(format!("signing CA {name} not found")))?;
            let (issuer, issuer_key) = load_authority(authority)?;
            let cert = cert_params
                .signed_by(&key_pair, &issuer, &issuer_key)
                .map_err(|e| GenerationError::new(format!("certificate signing failed: {e}")))?;
            (cert.pem(), authority.certificate.clone())
        };

        Ok(CredentialValue::Certificate(CertificateValue {
            ca: Some(ca),
            certificate,
            private_key: pkcs8_private_pem(&key)?,
        }))
    }
}

fn certificate_params(
    params: &CertificateGenerationParameters,
    now: DateTime<Utc>,
) -> Result<CertificateParams, GenerationError> {
    let mut cert = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    for (kind, value) in [
        (DnType::CommonName, &params.common_name),
        (DnType::OrganizationName, &params.organization),
        (DnType::OrganizationalUnitName, &params.organization_unit),
        (DnType::LocalityName, &params.locality),
        (DnType::StateOrProvinceName, &params.state),
        (DnType::CountryName, &params.country),
    ] {
        if let Some(value) = value {
            dn.push(kind, value.as_str());
        }
    }
    cert.distinguished_name = dn;

    for name in &params.alternative_names {
        let san = match name.parse::<std::net::IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                name.clone()
                    .try_into()
                    .map_err(|e| GenerationError::new(format!("invalid DNS name {name:?}: {e}")))?,
            ),
        };
        cert.subject_alt_names.push(san);
    }

    cert.key_usages = params.key_usage.iter().map(|u| key_usage(*u)).collect();
    cert.extended_key_usages = params
        .extended_key_usage
        .iter()
        .map(|u| extended_key_usage(*u))
        .collect();

    if params.is_ca {
        cert.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        for required in [KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign] {
            if !cert.key_usages.contains(&required) {
                cert.key_usages.push(required);
            }
        }
    } else {
        cert.is_ca = IsCa::NoCa;
    }

    let today = now.date_naive();
    let expiry = today
        .checked_add_days(Days::new(u64::from(params.duration)))
        .ok_or_else(|| GenerationError::new("certificate expiry out of range"))?;
    cert.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    cert.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

    let mut serial = vec![0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut serial);
    // Serials are positive integers.
    serial[0] &= 0x7f;
    cert.serial_number = Some(SerialNumber::from(serial));

    Ok(cert)
}

/// Rebuild the issuer certificate and key from a stored CA credential.
fn load_authority(
    authority: &SigningAuthority,
) -> Result<(rcgen::Certificate, KeyPair), GenerationError> {
    let name = &authority.name;
    let params = CertificateParams::from_ca_cert_pem(&authority.certificate).map_err(|e| {
        GenerationError::new(format!("CA {name} has an unreadable certificate: {e}"))
    })?;
    if !matches!(params.is_ca, IsCa::Ca(_)) {
        return Err(GenerationError::new(format!(
            "{name} is not a certificate authority"
        )));
    }
    let key = RsaPrivateKey::from_pkcs1_pem(&authority.private_key)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&authority.private_key))
        .map_err(|e| {
            GenerationError::new(format!("CA {name} has an unreadable private key: {e}"))
        })?;
    let key_pair = rcgen_key_pair(&key)?;
    let issuer = params
        .self_signed(&key_pair)
        .map_err(|e| GenerationError::new(format!("CA {name} could not be loaded: {e}")))?;
    Ok((issuer, key_pair))
}

fn rcgen_key_pair(key: &RsaPrivateKey) -> Result<KeyPair, GenerationError> {
    KeyPair::from_pem_and_sign_algo(&pkcs8_private_pem(key)?, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| GenerationError::new(format!("unusable signing key: {e}")))
}

fn key_usage(usage: KeyUsage) -> KeyUsagePurpose {
    match usage {
        KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
        KeyUsage::NonRepudiation => KeyUsagePurpose::ContentCommitment,
        KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
        KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
        KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
        KeyUsage::KeyCertSign => KeyUsagePurpose::KeyCertSign,
        KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
        KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
    }
}

fn extended_key_usage(usage: ExtendedKeyUsage) -> ExtendedKeyUsagePurpose {
    match usage {
        ExtendedKeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsage::CodeSigning => ExtendedKeyUsagePurpose::CodeSigning,
        ExtendedKeyUsage::EmailProtection => ExtendedKeyUsagePurpose::EmailProtection,
        ExtendedKeyUsage::Timestamping => ExtendedKeyUsagePurpose::TimeStamping,
    }
}
