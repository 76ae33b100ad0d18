//! Built-in check battery
//!
//! Sections are registered in report order. Each module owns one section
//! and exposes a `section()` returning its definition.

mod disk_performance;
mod external_services;
mod kernel;
mod kubernetes;
mod performance;
mod resources;
mod storage;

use std::fmt::Display;

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};

use crate::config::Phase;
use crate::deps::ResolvedDeps;
use crate::registry::Registry;
use crate::spawner::Workload;
use compliance_common::kube_utils::exec_in_pod;
use compliance_common::Result;

/// Exclusive tag of the node benchmarks. Each one skews the others'
/// measurements, so they never overlap.
pub const STORAGE_BENCHMARK_TAG: &str = "storage-benchmark";

/// Registry holding every built-in section
pub fn builtin_registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register(kubernetes::section())?;
    registry.register(resources::section())?;
    registry.register(storage::section())?;
    registry.register(kernel::section())?;
    registry.register(external_services::section())?;
    registry.register(performance::section())?;
    registry.register(disk_performance::section())?;
    Ok(registry)
}

/// Skip predicate for work that only makes sense on a delivered cluster
fn pre_contract(deps: &ResolvedDeps) -> Result<bool> {
    Ok(deps.phase()? == Phase::PreContract)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// `[a, b, c]`
fn format_list<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Run `command` in every pod of `workload`, results in pod order
async fn exec_on_each_pod(
    client: &kube::Client,
    workload: &Workload,
    command: &str,
) -> Result<Vec<String>> {
    try_join_all(
        workload
            .pod_names()
            .into_iter()
            .map(|pod| async move { exec_in_pod(client, &workload.namespace, &pod, command).await }),
    )
    .await
}

/// Nodes carrying the label key `selector`
async fn list_nodes(client: &kube::Client, selector: &str) -> Result<Vec<Node>> {
    let nodes: Api<Node> = Api::all(client.clone());
    Ok(nodes.list(&ListParams::default().labels(selector)).await?.items)
}
