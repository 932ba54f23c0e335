use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variables consulted, in order, for the pod namespace.
pub const NAMESPACE_ENV_VARS: &[&str] = &["MY_POD_NAMESPACE", "POD_NAMESPACE"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("namespace not configured and none of {vars:?} is set")]
    MissingNamespace { vars: &'static [&'static str] },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    pub namespace: Option<String>,
    pub service_name: String,
    pub secret_name: Option<String>,
    pub webhook_configuration_name: Option<String>,
    pub cert_dir: PathBuf,
    pub requeue_after_secs: u64,
    pub health_addr: String,
    pub log_format: LogFormat,
}

/// Namespace, service and backing record name of one serving identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub service_name: String,
    pub secret_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            service_name: "admission-webhook".to_string(),
            secret_name: None,
            webhook_configuration_name: None,
            cert_dir: PathBuf::from("/tmp/k8s-webhook-server/serving-certs"),
            requeue_after_secs: 30,
            health_addr: "0.0.0.0:8081".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: ControllerConfig = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// Configured namespace, else the first set variable in [`NAMESPACE_ENV_VARS`].
    pub fn resolve_namespace<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ns) = self.namespace.as_ref().filter(|ns| !ns.is_empty()) {
            return Ok(ns.clone());
        }

        NAMESPACE_ENV_VARS
            .iter()
            .find_map(|var| lookup(var).filter(|ns| !ns.is_empty()))
            .ok_or(ConfigError::MissingNamespace {
                vars: NAMESPACE_ENV_VARS,
            })
    }

    pub fn secret_name(&self) -> &str {
        self.secret_name.as_deref().unwrap_or(&self.service_name)
    }

    pub fn webhook_configuration_name(&self) -> &str {
        self.webhook_configuration_name
            .as_deref()
            .unwrap_or(&self.service_name)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    pub fn identity<F>(&self, lookup: F) -> Result<ServiceIdentity, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(ServiceIdentity {
            namespace: self.resolve_namespace(lookup)?,
            service_name: self.service_name.clone(),
            secret_name: self.secret_name().to_string(),
        })
    }
}
