//! Certificate bundles persisted as Kubernetes Secrets.
//!
//! The Secret is the single source of truth for a serving identity. Creation
//! relies on the API server rejecting a second create of the same name, which
//! is the only coordination between concurrent reconciles.

use async_trait::async_trait;
use certsync_crypto::CertificateBundle;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const CA_CERT_KEY: &str = "ca.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const TLS_CERT_KEY: &str = "tls.crt";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "certsync";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("secret {namespace}/{name} is missing required key {key}")]
    Parse {
        namespace: String,
        name: String,
        key: &'static str,
    },
    #[error("secret {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },
    #[error("secret {namespace}/{name}: {source}")]
    Persistence {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Backing record for certificate bundles, addressed by `(namespace, name)`.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Load and parse the record.
    async fn fetch(&self, namespace: &str, name: &str) -> Result<CertificateBundle, StoreError>;

    /// Create the record; fails with [`StoreError::AlreadyExists`] if one is present.
    async fn create_if_absent(
        &self,
        namespace: &str,
        name: &str,
        bundle: &CertificateBundle,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: CertificateStore + ?Sized> CertificateStore for Arc<S> {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<CertificateBundle, StoreError> {
        (**self).fetch(namespace, name).await
    }

    async fn create_if_absent(
        &self,
        namespace: &str,
        name: &str,
        bundle: &CertificateBundle,
    ) -> Result<(), StoreError> {
        (**self).create_if_absent(namespace, name, bundle).await
    }
}

/// [`CertificateStore`] backed by Secrets in the Kubernetes API.
pub struct SecretStore {
    client: Client,
}

impl SecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CertificateStore for SecretStore {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<CertificateBundle, StoreError> {
        match self.api(namespace).get(name).await {
            Ok(secret) => bundle_from_secret(namespace, name, &secret),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(source) => Err(StoreError::Persistence {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn create_if_absent(
        &self,
        namespace: &str,
        name: &str,
        bundle: &CertificateBundle,
    ) -> Result<(), StoreError> {
        let secret = secret_from_bundle(namespace, name, bundle);
        match self.api(namespace).create(&PostParams::default(), &secret).await {
            Ok(_) => {
                debug!(namespace, name, "Created certificate secret");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::AlreadyExists {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(source) => Err(StoreError::Persistence {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Opaque Secret holding the CA certificate, leaf key and leaf certificate.
///
/// The CA private key is never written to the record.
pub fn secret_from_bundle(namespace: &str, name: &str, bundle: &CertificateBundle) -> Secret {
    let data = BTreeMap::from([
        (CA_CERT_KEY.to_string(), ByteString(bundle.ca_cert().to_vec())),
        (TLS_KEY_KEY.to_string(), ByteString(bundle.leaf_key().to_vec())),
        (TLS_CERT_KEY.to_string(), ByteString(bundle.leaf_cert().to_vec())),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Rebuild a bundle from a Secret; every required key must be present.
pub fn bundle_from_secret(
    namespace: &str,
    name: &str,
    secret: &Secret,
) -> Result<CertificateBundle, StoreError> {
    let empty = BTreeMap::new();
    let data = secret.data.as_ref().unwrap_or(&empty);

    let field = |key: &'static str| {
        data.get(key)
            .map(|value| value.0.clone())
            .ok_or_else(|| StoreError::Parse {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key,
            })
    };

    let ca_cert = field(CA_CERT_KEY)?;
    let leaf_key = field(TLS_KEY_KEY)?;
    let leaf_cert = field(TLS_CERT_KEY)?;

    Ok(CertificateBundle::from_parts(ca_cert, leaf_cert, leaf_key))
}
