//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, readiness polling, pod exec and quantity parsing used
//! by the spawner and by individual checks.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients (fio and mpstat execs run long)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);
/// Default polling interval for wait operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path the configuration is inferred: `$KUBECONFIG`, then
/// `~/.kube/config`, then the in-cluster service account.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Verify that the API server answers with the loaded credentials.
///
/// Returns the server's git version.
pub async fn check_api_health(client: &Client) -> Result<String, Error> {
    let info = client.apiserver_version().await?;
    debug!(version = %info.git_version, "API server reachable");
    Ok(info.git_version)
}

/// Poll until `poll_fn` yields a value or the timeout elapses.
///
/// `poll_fn` returns `Ok(Some(T))` when ready, `Ok(None)` to keep waiting.
/// Errors are treated as transient and logged at trace level, the last one is
/// included in the timeout message.
pub async fn wait_for_resource<T, F, Fut>(
    description: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut poll_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let start = Instant::now();
    let mut last_error: Option<String> = None;

    loop {
        match poll_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => trace!("{} not ready yet", description),
            Err(e) => {
                trace!(error = %e, "Poll error for {}, retrying", description);
                last_error = Some(e.to_string());
            }
        }

        if start.elapsed() >= timeout {
            let operation = match last_error {
                Some(e) => format!("waiting for {} (last error: {})", description, e),
                None => format!("waiting for {}", description),
            };
            return Err(Error::timeout(operation, timeout));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Run a shell command in the first container of a pod and return trimmed stdout.
pub async fn exec_in_pod(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    command: &str,
) -> Result<String, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = AttachParams::default().stdout(true).stderr(false).stdin(false);

    debug!(pod = %pod_name, command = %command, "Executing command in pod");
    let mut attached = pods
        .exec(pod_name, vec!["/bin/sh", "-c", command], &params)
        .await?;

    let mut stdout = attached
        .stdout()
        .ok_or_else(|| Error::internal_with_context("exec", "no stdout stream attached"))?;
    let mut output = String::new();
    stdout
        .read_to_string(&mut output)
        .await
        .map_err(|e| Error::internal_with_context("exec", format!("failed to read stdout: {}", e)))?;
    drop(stdout);

    attached
        .join()
        .await
        .map_err(|e| Error::internal_with_context("exec", e.to_string()))?;

    let output = output.trim().to_string();
    trace!(pod = %pod_name, output = %output, "Command output");
    Ok(output)
}

/// Parse a Kubernetes quantity ("1Gi", "500m", "2.5G", "1e3") into a number.
pub fn parse_quantity(quantity: &str) -> Result<f64, Error> {
    let quantity = quantity.trim();
    let invalid = || Error::validation_for(quantity, "not a valid Kubernetes quantity");

    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let exponent: i32 = exp[1..].parse().map_err(|_| invalid())?;
            10f64.powi(exponent)
        }
        _ => return Err(invalid()),
    };

    if value < 0.0 {
        return Err(invalid());
    }
    Ok(value * multiplier)
}

/// Parse a storage or memory quantity into whole bytes.
pub fn quantity_to_bytes(quantity: &str) -> Result<u64, Error> {
    Ok(parse_quantity(quantity)?.round() as u64)
}

/// Express a byte count in GiB rounded to two decimals, e.g. "15.52Gi".
pub fn format_gib(bytes: f64) -> String {
    let gib = bytes / 1024f64.powi(3);
    format!("{}Gi", (gib * 100.0).round() / 100.0)
}
