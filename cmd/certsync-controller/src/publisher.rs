//! Trust bundle propagation into a MutatingWebhookConfiguration.
//!
//! Only the `caBundle` bytes of each webhook entry are compared, so drift in
//! unrelated fields never triggers a write. A patch is a single JSON merge
//! patch pinned to the baseline's `resourceVersion`.

use async_trait::async_trait;
use certsync_crypto::CertificateBundle;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Patched { entries: usize },
    Unchanged,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("mutating webhook configuration {name} was modified concurrently")]
    Conflict { name: String },
    #[error("mutating webhook configuration {name}: {source}")]
    Api {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("mutating webhook configuration has no name")]
    MissingName,
    #[error("failed to encode webhook patch: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Access to MutatingWebhookConfiguration objects.
#[async_trait]
pub trait WebhookConfigurationClient: Send + Sync {
    async fn get(&self, name: &str) -> Result<MutatingWebhookConfiguration, PublishError>;

    /// Apply a JSON merge patch; [`PublishError::Conflict`] if the pinned
    /// `resourceVersion` is stale.
    async fn merge_patch(&self, name: &str, patch: &Value) -> Result<(), PublishError>;
}

pub struct KubeWebhookConfigurations {
    api: Api<MutatingWebhookConfiguration>,
}

impl KubeWebhookConfigurations {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl WebhookConfigurationClient for KubeWebhookConfigurations {
    async fn get(&self, name: &str) -> Result<MutatingWebhookConfiguration, PublishError> {
        self.api.get(name).await.map_err(|source| PublishError::Api {
            name: name.to_string(),
            source,
        })
    }

    async fn merge_patch(&self, name: &str, patch: &Value) -> Result<(), PublishError> {
        match self
            .api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(PublishError::Conflict {
                name: name.to_string(),
            }),
            Err(source) => Err(PublishError::Api {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Indices of webhook entries whose `caBundle` differs from `ca_cert`.
pub fn stale_entries(registration: &MutatingWebhookConfiguration, ca_cert: &[u8]) -> Vec<usize> {
    registration
        .webhooks
        .iter()
        .flatten()
        .enumerate()
        .filter(|(_, webhook)| {
            webhook.client_config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(ca_cert)
        })
        .map(|(index, _)| index)
        .collect()
}

pub struct TrustBundlePublisher<C> {
    client: C,
}

impl<C: WebhookConfigurationClient> TrustBundlePublisher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Fetch the baseline registration for a reconcile.
    pub async fn fetch(&self, name: &str) -> Result<MutatingWebhookConfiguration, PublishError> {
        self.client.get(name).await
    }

    /// Make every webhook entry trust `bundle`'s CA certificate.
    ///
    /// Issues no write when all entries already match. Conflicts are returned
    /// to the caller, which must re-fetch the registration before retrying.
    pub async fn reconcile(
        &self,
        registration: &MutatingWebhookConfiguration,
        bundle: &CertificateBundle,
    ) -> Result<PublishOutcome, PublishError> {
        let name = registration
            .metadata
            .name
            .as_deref()
            .ok_or(PublishError::MissingName)?;

        let desired = bundle.ca_cert();
        let stale = stale_entries(registration, desired);
        if stale.is_empty() {
            debug!(webhook_configuration = name, "CA bundle already up to date");
            return Ok(PublishOutcome::Unchanged);
        }

        let mut webhooks = registration.webhooks.clone().unwrap_or_default();
        for &index in &stale {
            webhooks[index].client_config.ca_bundle = Some(ByteString(desired.to_vec()));
        }

        let mut patch = json!({ "webhooks": serde_json::to_value(&webhooks)? });
        if let Some(resource_version) = &registration.metadata.resource_version {
            patch["metadata"] = json!({ "resourceVersion": resource_version });
        }

        self.client.merge_patch(name, &patch).await?;

        info!(
            webhook_configuration = name,
            entries = stale.len(),
            "Patched CA bundle"
        );
        Ok(PublishOutcome::Patched {
            entries: stale.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::admissionregistration::v1::{MutatingWebhook, WebhookClientConfig};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Holds one object and applies merge patches the way the API server does
    /// for the fields touched here.
    pub(crate) struct InMemoryWebhookConfigurations {
        object: Mutex<MutatingWebhookConfiguration>,
        patches: AtomicUsize,
    }

    impl InMemoryWebhookConfigurations {
        pub(crate) fn new(object: MutatingWebhookConfiguration) -> Self {
            Self {
                object: Mutex::new(object),
                patches: AtomicUsize::new(0),
            }
        }

        pub(crate) fn patches(&self) -> usize {
            self.patches.load(Ordering::SeqCst)
        }

        pub(crate) fn current(&self) -> MutatingWebhookConfiguration {
            self.object.lock().unwrap().clone()
        }

        /// Simulate an unrelated writer bumping the object.
        pub(crate) fn touch(&self) {
            let mut object = self.object.lock().unwrap();
            bump_resource_version(&mut object);
        }
    }

    fn bump_resource_version(object: &mut MutatingWebhookConfiguration) {
        let next = object
            .metadata
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        object.metadata.resource_version = Some(next.to_string());
    }

    #[async_trait]
    impl WebhookConfigurationClient for InMemoryWebhookConfigurations {
        async fn get(&self, _name: &str) -> Result<MutatingWebhookConfiguration, PublishError> {
            Ok(self.current())
        }

        async fn merge_patch(&self, name: &str, patch: &Value) -> Result<(), PublishError> {
            let mut object = self.object.lock().unwrap();
            if let Some(rv) = patch
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
            {
                if object.metadata.resource_version.as_deref() != Some(rv) {
                    return Err(PublishError::Conflict {
                        name: name.to_string(),
                    });
                }
            }
            let webhooks: Vec<MutatingWebhook> =
                serde_json::from_value(patch["webhooks"].clone())?;
            object.webhooks = Some(webhooks);
            bump_resource_version(&mut object);
            self.patches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn webhook_entry(name: &str, ca_bundle: Option<&[u8]>) -> MutatingWebhook {
        MutatingWebhook {
            name: name.to_string(),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            client_config: WebhookClientConfig {
                ca_bundle: ca_bundle.map(|b| ByteString(b.to_vec())),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub(crate) fn registration(webhooks: Vec<MutatingWebhook>) -> MutatingWebhookConfiguration {
        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some("webhook".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            webhooks: Some(webhooks),
        }
    }

    fn bundle_with_ca(ca: &[u8]) -> CertificateBundle {
        CertificateBundle::from_parts(ca.to_vec(), b"leaf".to_vec(), b"key".to_vec())
    }

    #[test]
    fn test_stale_entries_compares_ca_bundle_only() {
        let mut drifted = webhook_entry("b.example.com", Some(b"ca"));
        drifted.failure_policy = Some("Ignore".to_string());

        let object = registration(vec![
            webhook_entry("a.example.com", None),
            drifted,
            webhook_entry("c.example.com", Some(b"old")),
            webhook_entry("d.example.com", Some(b"")),
        ]);

        assert_eq!(stale_entries(&object, b"ca"), vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_reconcile_patches_every_entry() {
        let client = InMemoryWebhookConfigurations::new(registration(vec![
            webhook_entry("a.example.com", Some(b"")),
            webhook_entry("b.example.com", Some(b"")),
        ]));
        let publisher = TrustBundlePublisher::new(client);
        let bundle = bundle_with_ca(b"ca-pem");

        let baseline = publisher.fetch("webhook").await.unwrap();
        let outcome = publisher.reconcile(&baseline, &bundle).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Patched { entries: 2 });
        let current = publisher.client.current();
        for webhook in current.webhooks.unwrap() {
            assert_eq!(webhook.client_config.ca_bundle.unwrap().0, b"ca-pem");
        }
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let client = InMemoryWebhookConfigurations::new(registration(vec![
            webhook_entry("a.example.com", None),
            webhook_entry("b.example.com", Some(b"stale")),
        ]));
        let publisher = TrustBundlePublisher::new(client);
        let bundle = bundle_with_ca(b"ca-pem");

        let first = publisher.fetch("webhook").await.unwrap();
        assert!(matches!(
            publisher.reconcile(&first, &bundle).await.unwrap(),
            PublishOutcome::Patched { .. }
        ));

        let second = publisher.fetch("webhook").await.unwrap();
        assert_eq!(
            publisher.reconcile(&second, &bundle).await.unwrap(),
            PublishOutcome::Unchanged
        );
        assert_eq!(publisher.client.patches(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_only_touches_stale_entries() {
        let mut matching = webhook_entry("a.example.com", Some(b"ca-pem"));
        matching.timeout_seconds = Some(5);
        let client = InMemoryWebhookConfigurations::new(registration(vec![
            matching.clone(),
            webhook_entry("b.example.com", Some(b"old")),
        ]));
        let publisher = TrustBundlePublisher::new(client);

        let baseline = publisher.fetch("webhook").await.unwrap();
        let outcome = publisher
            .reconcile(&baseline, &bundle_with_ca(b"ca-pem"))
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::Patched { entries: 1 });
        let webhooks = publisher.client.current().webhooks.unwrap();
        assert_eq!(webhooks[0], matching);
        assert_eq!(webhooks[1].client_config.ca_bundle.as_ref().unwrap().0, b"ca-pem");
    }

    #[tokio::test]
    async fn test_reconcile_surfaces_conflict() {
        let client = InMemoryWebhookConfigurations::new(registration(vec![webhook_entry(
            "a.example.com",
            None,
        )]));
        let publisher = TrustBundlePublisher::new(client);

        let baseline = publisher.fetch("webhook").await.unwrap();
        publisher.client.touch();

        let err = publisher
            .reconcile(&baseline, &bundle_with_ca(b"ca-pem"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Conflict { .. }));
        assert_eq!(publisher.client.patches(), 0);

        // A fresh baseline succeeds
        let refreshed = publisher.fetch("webhook").await.unwrap();
        let outcome = publisher
            .reconcile(&refreshed, &bundle_with_ca(b"ca-pem"))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Patched { entries: 1 });
    }

    #[tokio::test]
    async fn test_reconcile_without_entries_is_unchanged() {
        let client = InMemoryWebhookConfigurations::new(registration(vec![]));
        let publisher = TrustBundlePublisher::new(client);

        let baseline = publisher.fetch("webhook").await.unwrap();
        let outcome = publisher
            .reconcile(&baseline, &bundle_with_ca(b"ca-pem"))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Unchanged);
        assert_eq!(publisher.client.patches(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_requires_name() {
        let mut object = registration(vec![webhook_entry("a.example.com", None)]);
        object.metadata.name = None;
        let publisher = TrustBundlePublisher::new(InMemoryWebhookConfigurations::new(object.clone()));

        let err = publisher
            .reconcile(&object, &bundle_with_ca(b"ca-pem"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::MissingName));
    }
}
