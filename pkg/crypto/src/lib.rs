//! Certificate material for the admission webhook serving identity.
//!
//! - [`keypair`] builds RSA keys and X.509 certificates (CA and leaf)
//! - [`ca`] composes those into a full [`CertificateBundle`] for a service
//! - [`local`] writes a bundle to the directory the TLS server reads
//! - [`inspect`] decodes PEM certificates for logging and verification

pub mod bundle;
pub mod ca;
pub mod inspect;
pub mod keypair;
pub mod local;

use thiserror::Error;

pub use bundle::CertificateBundle;
pub use ca::{generate_certificate_bundle, service_dns_name};
pub use inspect::{inspect_certificate, verify_issued_by, CertificateInfo, InspectError};
pub use local::{persist, read_bundle, WriteError};

/// Cryptographic key or certificate construction failed.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("must specify a common name")]
    MissingCommonName,
    #[error("must specify at least one extended key usage")]
    MissingExtendedUsage,
}
