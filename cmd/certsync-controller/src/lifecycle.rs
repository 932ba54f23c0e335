//! Certificate lifecycle manager
//!
//! Decides between generating and loading the serving certificate, persists
//! it, and refreshes the local copy used by the TLS server.

use crate::store::{CertificateStore, StoreError};
use certsync_config::ServiceIdentity;
use certsync_crypto::{
    generate_certificate_bundle, inspect_certificate, persist, CertificateBundle,
    GenerationError, WriteError,
};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to fetch certificate secret {namespace}/{name}: {source}")]
    Fetch {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to generate certificates for {namespace}/{service}: {source}")]
    Generate {
        namespace: String,
        service: String,
        #[source]
        source: GenerationError,
    },
    #[error("failed to create certificate secret {namespace}/{name}: {source}")]
    Create {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to re-fetch certificate secret {namespace}/{name} after a concurrent create: {source}")]
    Refetch {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to write local certificates: {0}")]
    WriteLocal(#[from] WriteError),
}

pub struct CertificateLifecycleManager<S> {
    store: S,
}

impl<S: CertificateStore> CertificateLifecycleManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Return the authoritative bundle for `identity`, creating it on first use,
    /// and refresh the files in `cert_dir` from it.
    ///
    /// At most one CA is ever persisted per identity: if a concurrent caller
    /// creates the record first, the locally generated bundle is discarded in
    /// favor of the stored one.
    #[instrument(skip_all, fields(namespace = %identity.namespace, name = %identity.secret_name))]
    pub async fn ensure_certificate(
        &self,
        identity: &ServiceIdentity,
        cert_dir: &Path,
    ) -> Result<CertificateBundle, LifecycleError> {
        let bundle = match self
            .store
            .fetch(&identity.namespace, &identity.secret_name)
            .await
        {
            Ok(bundle) => {
                debug!("Using certificate bundle from existing secret");
                bundle
            }
            Err(StoreError::NotFound { .. }) => self.create_bundle(identity).await?,
            Err(source) => {
                return Err(LifecycleError::Fetch {
                    namespace: identity.namespace.clone(),
                    name: identity.secret_name.clone(),
                    source,
                })
            }
        };

        persist(&bundle, cert_dir)?;
        log_expiry(&bundle);

        Ok(bundle)
    }

    async fn create_bundle(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<CertificateBundle, LifecycleError> {
        info!("No certificate secret found, generating a new certificate authority");

        let generated = generate_certificate_bundle(&identity.namespace, &identity.service_name)
            .map_err(|source| LifecycleError::Generate {
                namespace: identity.namespace.clone(),
                service: identity.service_name.clone(),
                source,
            })?;

        match self
            .store
            .create_if_absent(&identity.namespace, &identity.secret_name, &generated)
            .await
        {
            Ok(()) => {
                info!("Stored new certificate bundle");
                Ok(generated.without_ca_key())
            }
            Err(StoreError::AlreadyExists { .. }) => {
                info!("Certificate secret was created concurrently, using the stored bundle");
                self.store
                    .fetch(&identity.namespace, &identity.secret_name)
                    .await
                    .map_err(|source| LifecycleError::Refetch {
                        namespace: identity.namespace.clone(),
                        name: identity.secret_name.clone(),
                        source,
                    })
            }
            Err(source) => Err(LifecycleError::Create {
                namespace: identity.namespace.clone(),
                name: identity.secret_name.clone(),
                source,
            }),
        }
    }
}

fn log_expiry(bundle: &CertificateBundle) {
    match inspect_certificate(bundle.leaf_cert()) {
        Ok(info) => debug!(
            common_name = ?info.common_name,
            not_after = %info.not_after,
            days_until_expiry = info.days_until_expiry,
            "Serving certificate ready"
        ),
        Err(e) => warn!(error = %e, "Stored leaf certificate could not be decoded"),
    }
}
