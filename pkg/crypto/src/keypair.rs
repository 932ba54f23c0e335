//! RSA key and X.509 certificate construction.
//!
//! All randomness (keys and serial numbers) comes from OpenSSL's CSPRNG.

use crate::GenerationError;
use openssl::asn1::{Asn1Integer, Asn1Time, Asn1Type};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509};

/// RSA modulus size for every key this crate creates.
pub const RSA_KEY_BITS: u32 = 2048;

/// Validity of both the CA and the leaf certificate (10 years).
pub const VALIDITY_DAYS: u32 = 365 * 10;

/// Extended key usages a leaf certificate may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedUsage {
    ServerAuth,
    ClientAuth,
}

/// Subject of a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafIdentity {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub usages: Vec<ExtendedUsage>,
}

/// Generate a 2048-bit RSA private key.
pub fn generate_private_key() -> Result<PKey<Private>, GenerationError> {
    let rsa = Rsa::generate(RSA_KEY_BITS)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// Generate a self-signed CA certificate together with its own key.
pub fn self_sign_ca(common_name: &str) -> Result<(X509, PKey<Private>), GenerationError> {
    if common_name.is_empty() {
        return Err(GenerationError::MissingCommonName);
    }

    let key = generate_private_key()?;
    let name = subject_name(common_name)?;
    let serial = random_serial()?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;

    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    let subject_key_id =
        SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(subject_key_id)?;
    let san = SubjectAlternativeName::new()
        .dns(common_name)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;

    builder.sign(&key, MessageDigest::sha256())?;

    Ok((builder.build(), key))
}

/// Issue a server leaf certificate for `identity`, signed by the CA.
///
/// A fresh key pair is generated for the leaf. The leaf inherits the CA's
/// `notBefore` and expires ten years from now.
pub fn sign_leaf(
    identity: &LeafIdentity,
    ca_cert: &X509,
    ca_key: &PKey<Private>,
) -> Result<(X509, PKey<Private>), GenerationError> {
    if identity.common_name.is_empty() {
        return Err(GenerationError::MissingCommonName);
    }
    if identity.usages.is_empty() {
        return Err(GenerationError::MissingExtendedUsage);
    }

    let key = generate_private_key()?;
    let serial = random_serial()?;
    let subject = subject_name(&identity.common_name)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&subject)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    builder.set_pubkey(&key)?;

    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
    builder.set_not_before(ca_cert.not_before())?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_encipherment()
            .digital_signature()
            .build()?,
    )?;

    let mut extended = ExtendedKeyUsage::new();
    for usage in &identity.usages {
        match usage {
            ExtendedUsage::ServerAuth => {
                extended.server_auth();
            }
            ExtendedUsage::ClientAuth => {
                extended.client_auth();
            }
        }
    }
    builder.append_extension(extended.build()?)?;

    let subject_key_id =
        SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(ca_cert), None))?;
    builder.append_extension(subject_key_id)?;
    let authority_key_id = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(ca_cert), None))?;
    builder.append_extension(authority_key_id)?;

    if !identity.dns_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in &identity.dns_names {
            san.dns(dns);
        }
        let san = san.build(&builder.x509v3_context(Some(ca_cert), None))?;
        builder.append_extension(san)?;
    }

    builder.sign(ca_key, MessageDigest::sha256())?;

    Ok((builder.build(), key))
}

/// PEM-encode a certificate.
pub fn certificate_to_pem(cert: &X509) -> Result<Vec<u8>, GenerationError> {
    Ok(cert.to_pem()?)
}

/// PEM-encode a private key as PKCS#8.
pub fn private_key_to_pem(key: &PKey<Private>) -> Result<Vec<u8>, GenerationError> {
    Ok(key.private_key_to_pem_pkcs8()?)
}

// UTF8String skips the 64-byte ub-common-name check applied by the NID table;
// `<service>.<namespace>.svc` can be longer than that.
fn subject_name(common_name: &str) -> Result<X509Name, GenerationError> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid_with_type(Nid::COMMONNAME, common_name, Asn1Type::UTF8STRING)?;
    Ok(name.build())
}

/// Serial drawn uniformly from `[0, i64::MAX)`.
fn random_serial() -> Result<Asn1Integer, GenerationError> {
    let limit = BigNum::from_dec_str(&i64::MAX.to_string())?;
    let mut serial = BigNum::new()?;
    limit.rand_range(&mut serial)?;
    Ok(serial.to_asn1_integer()?)
}
