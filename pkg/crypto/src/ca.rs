//! Self-signed certificate authority bundles for in-cluster services.

use crate::bundle::CertificateBundle;
use crate::keypair::{
    certificate_to_pem, private_key_to_pem, self_sign_ca, sign_leaf, ExtendedUsage, LeafIdentity,
};
use crate::GenerationError;
use tracing::debug;

/// Common name of every CA generated here.
pub const CA_COMMON_NAME: &str = "self-signed-k8s-cert";

/// In-cluster DNS name of a service: `<service>.<namespace>.svc`.
pub fn service_dns_name(namespace: &str, service_name: &str) -> String {
    format!("{}.{}.svc", service_name, namespace)
}

/// Generate a new CA and a server leaf certificate for the service.
///
/// Pure and repeatable; every call yields different key material.
pub fn generate_certificate_bundle(
    namespace: &str,
    service_name: &str,
) -> Result<CertificateBundle, GenerationError> {
    let (ca_cert, ca_key) = self_sign_ca(CA_COMMON_NAME)?;

    let dns_name = service_dns_name(namespace, service_name);
    let identity = LeafIdentity {
        common_name: dns_name.clone(),
        dns_names: vec![dns_name],
        usages: vec![ExtendedUsage::ServerAuth],
    };
    let (leaf_cert, leaf_key) = sign_leaf(&identity, &ca_cert, &ca_key)?;
    debug!(common_name = %identity.common_name, "Generated CA and serving certificate");

    Ok(CertificateBundle::generated(
        certificate_to_pem(&ca_cert)?,
        private_key_to_pem(&ca_key)?,
        certificate_to_pem(&leaf_cert)?,
        private_key_to_pem(&leaf_key)?,
    ))
}
