//! certsync controller
//!
//! Keeps the admission webhook's TLS serving identity consistent across:
//! - the certificate Secret (single source of truth)
//! - the local certificate directory read by the webhook server
//! - the caBundle of every entry in the MutatingWebhookConfiguration
//!
//! Additionally provides HTTP endpoints for:
//! - /healthz - Liveness checks
//! - /readyz - Readiness checks

use certsync_config::ControllerConfig;
use clap::Parser;
use kube::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod controller;
mod health;
mod lifecycle;
mod publisher;
mod store;
mod telemetry;

use controller::Context;
use lifecycle::CertificateLifecycleManager;
use publisher::{KubeWebhookConfigurations, TrustBundlePublisher};
use store::SecretStore;

#[derive(Parser)]
#[command(name = "certsync-controller")]
#[command(about = "Admission webhook certificate and trust bundle controller", long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Namespace of the webhook service (defaults to MY_POD_NAMESPACE)
    #[arg(long)]
    namespace: Option<String>,

    /// Directory the webhook server loads its certificates from
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Address the health probe endpoint binds to
    #[arg(long = "health-probe-bind-address")]
    health_addr: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(self, config: &mut ControllerConfig) {
        if let Some(namespace) = self.namespace {
            config.namespace = Some(namespace);
        }
        if let Some(cert_dir) = self.cert_dir {
            config.cert_dir = cert_dir;
        }
        if let Some(health_addr) = self.health_addr {
            config.health_addr = health_addr;
        }
        if self.log_json {
            config.log_format = certsync_config::LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    cli.apply(&mut config);

    telemetry::init_telemetry(config.log_format)?;

    let identity = config.identity(|var| std::env::var(var).ok())?;
    info!(
        namespace = %identity.namespace,
        service = %identity.service_name,
        secret = %identity.secret_name,
        webhook_configuration = %config.webhook_configuration_name(),
        cert_dir = %config.cert_dir.display(),
        "certsync controller starting"
    );

    let client = Client::try_default().await?;
    let lifecycle = CertificateLifecycleManager::new(SecretStore::new(client.clone()));
    let publisher = TrustBundlePublisher::new(KubeWebhookConfigurations::new(client.clone()));

    // Start health HTTP server
    let health_addr: SocketAddr = config.health_addr.parse()?;
    let health_state = Arc::new(health::HealthState::default());
    let health_router = health::create_health_router(health_state.clone());
    let listener = tokio::net::TcpListener::bind(health_addr).await?;
    info!(addr = %health_addr, "Starting health HTTP server");
    let health_server = tokio::spawn(async move { axum::serve(listener, health_router).await });

    // The webhook server cannot start without its certificate
    if let Err(e) = lifecycle
        .ensure_certificate(&identity, &config.cert_dir)
        .await
    {
        error!(error = %e, "Failed to ensure serving certificate");
        return Err(e.into());
    }
    health_state.mark_ready().await;

    let ctx = Arc::new(Context {
        lifecycle,
        publisher,
        identity,
        cert_dir: config.cert_dir.clone(),
        webhook_configuration_name: config.webhook_configuration_name().to_string(),
        requeue_after: config.requeue_after(),
    });

    tokio::select! {
        _ = controller::run(client, ctx) => {
            info!("Controller stopped");
        }
        result = health_server => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "Health server error"),
                Err(e) => warn!(error = %e, "Health server task failed"),
                Ok(Ok(())) => info!("Health server stopped"),
            }
        }
    }

    info!("certsync controller shutting down");
    Ok(())
}
