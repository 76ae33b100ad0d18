//! Run configuration
//!
//! `CheckerConfig` is the validated input of the dependency factories. It is
//! independent of the command line so tests and embedders can build one
//! directly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use compliance_common::{Error, Result, DEFAULT_NAMESPACE};

/// Default image carrying sysctl, mpstat, fio and curl
pub const DEFAULT_TOOLS_IMAGE: &str = "ghcr.io/piwikpro/cluster-compliance-checker-tools";

/// Default image registry of the product
pub const DEFAULT_REGISTRY_SERVER: &str = "piwikpro.azurecr.io";

/// Expected monthly traffic, in millions of actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum MonthlyTraffic {
    /// Up to 10M actions
    #[default]
    #[value(name = "10")]
    #[serde(rename = "10")]
    M10,
    /// Up to 50M actions
    #[value(name = "50")]
    #[serde(rename = "50")]
    M50,
    /// Up to 100M actions
    #[value(name = "100")]
    #[serde(rename = "100")]
    M100,
    /// Up to 250M actions
    #[value(name = "250")]
    #[serde(rename = "250")]
    M250,
    /// Up to 500M actions
    #[value(name = "500")]
    #[serde(rename = "500")]
    M500,
}

impl fmt::Display for MonthlyTraffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millions = match self {
            Self::M10 => 10,
            Self::M50 => 50,
            Self::M100 => 100,
            Self::M250 => 250,
            Self::M500 => 500,
        };
        write!(f, "{}M", millions)
    }
}

/// How the installation is maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceType {
    /// The vendor maintains the installation remotely
    #[default]
    RemoteAccess,
    /// The customer maintains the installation
    SelfSupport,
}

/// Stage of the sales/installation process the checker runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Cluster may not be sized yet, hardware checks are skipped
    #[default]
    PreContract,
    /// Cluster is expected to be production ready
    PreInstall,
}

/// Image registry credentials used for the image pull secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry host
    pub server: String,
    /// Registry username
    pub username: Option<String>,
    /// Registry password
    pub password: Option<String>,
}

impl RegistryConfig {
    /// Docker config JSON for a `kubernetes.io/dockerconfigjson` secret.
    ///
    /// `None` when no credentials were configured.
    pub fn docker_config_json(&self) -> Option<Vec<u8>> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(u), Some(p)) => (u, p),
            _ => return None,
        };
        let config = serde_json::json!({
            "auths": {
                self.server.clone(): {
                    "username": username,
                    "password": password,
                }
            }
        });
        Some(config.to_string().into_bytes())
    }
}

/// Everything a run needs to know before it touches the cluster
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Installation has no internet access
    pub offline: bool,
    /// Traffic tier selecting the hardware requirement table
    pub monthly_traffic: MonthlyTraffic,
    /// Maintenance model
    pub maintenance_type: MaintenanceType,
    /// Run phase
    pub phase: Phase,
    /// Registry credentials
    pub registry: RegistryConfig,
    /// Fully qualified tools image (with tag)
    pub tools_image: String,
    /// Storage class for spawned volumes (cluster default when `None`)
    pub storage_class: Option<String>,
    /// Namespaces allowed in addition to the built-in whitelist
    pub namespace_whitelist: Vec<String>,
    /// Namespace spawned workloads are created in
    pub namespace: String,
    /// Explicit kubeconfig path (inferred when `None`)
    pub kubeconfig: Option<PathBuf>,
    /// Ceiling on simultaneously running checks
    pub max_concurrent_checks: usize,
    /// Per-check timeout
    pub check_timeout: Duration,
    /// How long spawned workloads may take to become ready
    pub ready_timeout: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            offline: false,
            monthly_traffic: MonthlyTraffic::default(),
            maintenance_type: MaintenanceType::default(),
            phase: Phase::default(),
            registry: RegistryConfig {
                server: DEFAULT_REGISTRY_SERVER.to_string(),
                username: None,
                password: None,
            },
            tools_image: format!("{}:{}", DEFAULT_TOOLS_IMAGE, env!("CARGO_PKG_VERSION")),
            storage_class: None,
            namespace_whitelist: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: None,
            max_concurrent_checks: 4,
            check_timeout: Duration::from_secs(600),
            ready_timeout: Duration::from_secs(120),
        }
    }
}

impl CheckerConfig {
    /// Reject configurations no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.tools_image.trim().is_empty() {
            return Err(Error::validation_for_field(
                "config",
                "tools_image",
                "tools image must not be empty",
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::validation_for_field(
                "config",
                "namespace",
                "namespace must not be empty",
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(Error::validation_for_field(
                "config",
                "max_concurrent_checks",
                "at least one check must be allowed to run",
            ));
        }
        if self.check_timeout.is_zero() || self.ready_timeout.is_zero() {
            return Err(Error::validation_for_field(
                "config",
                "timeouts",
                "timeouts must be greater than zero",
            ));
        }
        if self.registry.username.is_some() != self.registry.password.is_some() {
            return Err(Error::validation_for_field(
                "config",
                "registry",
                "registry username and password must be given together",
            ));
        }
        Ok(())
    }
}
