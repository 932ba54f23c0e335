//! Reconciliation of the MutatingWebhookConfiguration trust bundle.
//!
//! Every event for the configured webhook configuration runs one strictly
//! sequential pass: ensure the certificate, fetch a fresh baseline of the
//! registration, publish the CA bundle. Failures are requeued after a flat
//! backoff.

use crate::lifecycle::{CertificateLifecycleManager, LifecycleError};
use crate::publisher::{
    PublishError, PublishOutcome, TrustBundlePublisher, WebhookConfigurationClient,
};
use crate::store::CertificateStore;
use certsync_config::ServiceIdentity;
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Shared state for every reconcile invocation.
pub struct Context<S, C> {
    pub lifecycle: CertificateLifecycleManager<S>,
    pub publisher: TrustBundlePublisher<C>,
    pub identity: ServiceIdentity,
    pub cert_dir: PathBuf,
    pub webhook_configuration_name: String,
    pub requeue_after: Duration,
}

/// One full pass: certificate, then trust bundle.
pub async fn sync_trust_bundle<S, C>(ctx: &Context<S, C>) -> Result<PublishOutcome, ReconcileError>
where
    S: CertificateStore,
    C: WebhookConfigurationClient,
{
    let bundle = ctx
        .lifecycle
        .ensure_certificate(&ctx.identity, &ctx.cert_dir)
        .await?;
    let baseline = ctx.publisher.fetch(&ctx.webhook_configuration_name).await?;
    Ok(ctx.publisher.reconcile(&baseline, &bundle).await?)
}

pub async fn reconcile<S, C>(
    obj: Arc<MutatingWebhookConfiguration>,
    ctx: Arc<Context<S, C>>,
) -> Result<Action, ReconcileError>
where
    S: CertificateStore,
    C: WebhookConfigurationClient,
{
    debug!(webhook_configuration = %obj.name_any(), "Reconciling webhook configuration");

    match sync_trust_bundle(&ctx).await? {
        PublishOutcome::Patched { entries } => info!(
            webhook_configuration = %obj.name_any(),
            entries,
            "CA bundle published"
        ),
        PublishOutcome::Unchanged => debug!(
            webhook_configuration = %obj.name_any(),
            "No CA bundle change needed"
        ),
    }

    Ok(Action::await_change())
}

pub fn error_policy<S, C>(
    obj: Arc<MutatingWebhookConfiguration>,
    error: &ReconcileError,
    ctx: Arc<Context<S, C>>,
) -> Action {
    error!(
        webhook_configuration = %obj.name_any(),
        error = %error,
        retry_in_secs = ctx.requeue_after.as_secs(),
        "Reconcile failed"
    );
    Action::requeue(ctx.requeue_after)
}

/// Watch the configured MutatingWebhookConfiguration until shutdown.
pub async fn run<S, C>(client: Client, ctx: Arc<Context<S, C>>)
where
    S: CertificateStore + 'static,
    C: WebhookConfigurationClient + 'static,
{
    let api: Api<MutatingWebhookConfiguration> = Api::all(client);
    let watcher_config = watcher::Config::default()
        .fields(&format!("metadata.name={}", ctx.webhook_configuration_name));

    info!(
        webhook_configuration = %ctx.webhook_configuration_name,
        "Starting webhook configuration controller"
    );

    Controller::new(api, watcher_config)
        .shutdown_on_signal()
        .run(reconcile::<S, C>, error_policy::<S, C>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(object = %object.name, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;
}
