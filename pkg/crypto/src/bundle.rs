use std::fmt;

/// PEM-encoded certificate material for one service identity.
///
/// The CA certificate, leaf certificate and leaf key are always present
/// together. The CA private key only exists on a freshly generated bundle;
/// bundles loaded back from a persisted record never carry it.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    ca_cert: Vec<u8>,
    leaf_cert: Vec<u8>,
    leaf_key: Vec<u8>,
    ca_key: Option<Vec<u8>>,
}

impl CertificateBundle {
    /// Bundle produced by generation, still holding the CA signing key.
    pub fn generated(
        ca_cert: Vec<u8>,
        ca_key: Vec<u8>,
        leaf_cert: Vec<u8>,
        leaf_key: Vec<u8>,
    ) -> Self {
        Self {
            ca_cert,
            leaf_cert,
            leaf_key,
            ca_key: Some(ca_key),
        }
    }

    /// Bundle rebuilt from a persisted record.
    pub fn from_parts(ca_cert: Vec<u8>, leaf_cert: Vec<u8>, leaf_key: Vec<u8>) -> Self {
        Self {
            ca_cert,
            leaf_cert,
            leaf_key,
            ca_key: None,
        }
    }

    pub fn ca_cert(&self) -> &[u8] {
        &self.ca_cert
    }

    pub fn leaf_cert(&self) -> &[u8] {
        &self.leaf_cert
    }

    pub fn leaf_key(&self) -> &[u8] {
        &self.leaf_key
    }

    pub fn ca_key(&self) -> Option<&[u8]> {
        self.ca_key.as_deref()
    }

    /// Drop the CA signing key once the leaf has been signed.
    pub fn without_ca_key(mut self) -> Self {
        self.ca_key = None;
        self
    }
}

// Keys never end up in logs.
impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("ca_cert_len", &self.ca_cert.len())
            .field("leaf_cert_len", &self.leaf_cert.len())
            .field("leaf_key", &"<redacted>")
            .field("has_ca_key", &self.ca_key.is_some())
            .finish()
    }
}
