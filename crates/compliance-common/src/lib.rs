//! Common types for the compliance checker: errors, retry and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace ephemeral workloads are spawned into unless configured otherwise
pub const DEFAULT_NAMESPACE: &str = "default";

/// Label key linking spawned pods and PVCs to their owning workload
pub const APP_LABEL: &str = "app";

/// Label key marking resources created by the checker
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for resources created by the checker
pub const LABEL_MANAGED_BY_CHECKER: &str = "cluster-compliance-checker";
