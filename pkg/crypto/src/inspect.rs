//! Certificate inspection utilities
//!
//! Decodes PEM certificates to report subject, SANs and expiry, and checks
//! that a leaf was signed by a given CA.

use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::x509::X509;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Failed to parse certificate: {0}")]
    Parse(#[from] openssl::error::ErrorStack),
}

pub type Result<T> = std::result::Result<T, InspectError>;

/// Decoded view of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub not_before: String,
    pub not_after: String,
    pub days_until_expiry: i64,
}

/// Decode a PEM certificate.
pub fn inspect_certificate(cert_pem: &[u8]) -> Result<CertificateInfo> {
    let cert = X509::from_pem(cert_pem)?;

    let common_name = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| std::str::from_utf8(entry.data().as_slice()).ok())
        .map(str::to_string);

    let dns_names = cert
        .subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(CertificateInfo {
        common_name,
        dns_names,
        not_before: cert.not_before().to_string(),
        not_after: cert.not_after().to_string(),
        days_until_expiry: days_until(cert.not_after())?,
    })
}

/// Check that `leaf_pem` carries a valid signature from the key of `ca_pem`.
pub fn verify_issued_by(leaf_pem: &[u8], ca_pem: &[u8]) -> Result<bool> {
    let leaf = X509::from_pem(leaf_pem)?;
    let ca = X509::from_pem(ca_pem)?;
    let ca_public = ca.public_key()?;
    Ok(leaf.verify(&ca_public)?)
}

fn days_until(time: &Asn1TimeRef) -> Result<i64> {
    let now = Asn1Time::days_from_now(0)?;
    let diff = now.diff(time)?;
    Ok(i64::from(diff.days))
}
