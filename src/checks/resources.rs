//! Resources section: nodepool sizes against the hardware requirement table
//!
//! Nodes belong to a nodepool when they carry a label named after it. Every
//! metric is checked for every nodepool the traffic tier defines.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

use super::{format_list, list_nodes, pre_contract};
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use crate::requirements::NodepoolRequirement;
use compliance_common::kube_utils::{format_gib, parse_quantity};
use compliance_common::{Error, Result};

/// Share of the required memory or disk a node may lack
const CAPACITY_TOLERANCE: f64 = 0.05;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

const NODEPOOLS: [&str; 5] = ["apps", "tools", "services", "clickhouse", "clickhouse_trucker"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    NodeCount,
    Cpus,
    Memory,
    EphemeralStorage,
}

impl Metric {
    const ALL: [Metric; 4] = [
        Metric::NodeCount,
        Metric::Cpus,
        Metric::Memory,
        Metric::EphemeralStorage,
    ];

    /// Check identifiers, in `NODEPOOLS` order
    fn ids(self) -> [&'static str; 5] {
        match self {
            Metric::NodeCount => [
                "nodes_apps",
                "nodes_tools",
                "nodes_services",
                "nodes_clickhouse",
                "nodes_clickhouse_trucker",
            ],
            Metric::Cpus => [
                "cpus_apps",
                "cpus_tools",
                "cpus_services",
                "cpus_clickhouse",
                "cpus_clickhouse_trucker",
            ],
            Metric::Memory => [
                "memory_apps",
                "memory_tools",
                "memory_services",
                "memory_clickhouse",
                "memory_clickhouse_trucker",
            ],
            Metric::EphemeralStorage => [
                "ephemeral_storage_apps",
                "ephemeral_storage_tools",
                "ephemeral_storage_services",
                "ephemeral_storage_clickhouse",
                "ephemeral_storage_clickhouse_trucker",
            ],
        }
    }

    fn name(self, nodepool: &str) -> String {
        match self {
            Metric::NodeCount => format!("Number of nodes in \"{}\" nodepool", nodepool),
            Metric::Cpus => format!("Number of CPUs in \"{}\" nodepool", nodepool),
            Metric::Memory => format!("Nodes' memory in \"{}\" nodepool", nodepool),
            Metric::EphemeralStorage => {
                format!("Nodes' ephemeral storage in \"{}\" nodepool", nodepool)
            }
        }
    }

    fn description(self, nodepool: &str) -> String {
        match self {
            Metric::NodeCount => format!(
                "Ensure that nodes count in \"{}\" nodepool matches our requirements",
                nodepool
            ),
            Metric::Cpus => format!("Ensure that each node in \"{}\" nodepool has enough CPUs", nodepool),
            Metric::Memory => {
                format!("Ensure that each node in \"{}\" nodepool has enough memory", nodepool)
            }
            Metric::EphemeralStorage => format!(
                "Ensure that each node in \"{}\" nodepool has enough ephemeral storage",
                nodepool
            ),
        }
    }

    fn capacity_key(self) -> Option<&'static str> {
        match self {
            Metric::NodeCount => None,
            Metric::Cpus => Some("cpu"),
            Metric::Memory => Some("memory"),
            Metric::EphemeralStorage => Some("ephemeral-storage"),
        }
    }
}

pub(super) fn section() -> SectionDef {
    let mut section = SectionDef::new(
        "resources",
        "Resources",
        "Checks ensuring that infrastructure meets our Hardware and Software Requirements needs.",
    );
    for metric in Metric::ALL {
        for (nodepool, id) in NODEPOOLS.into_iter().zip(metric.ids()) {
            section = section.check(move || Box::new(NodepoolCheck::new(id, nodepool, metric)));
        }
    }
    section
}

/// Capacity of every node for `key`, e.g. `cpu` or `memory`
fn node_capacities(nodes: &[Node], key: &str) -> Result<Vec<f64>> {
    nodes
        .iter()
        .map(|node| {
            let quantity = node
                .status
                .as_ref()
                .and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get(key))
                .ok_or_else(|| {
                    Error::internal_with_context(
                        "node_capacities",
                        format!(
                            "node {} reports no {} capacity",
                            node.metadata.name.as_deref().unwrap_or_default(),
                            key
                        ),
                    )
                })?;
            parse_quantity(&quantity.0)
        })
        .collect()
}

fn evaluate(metric: Metric, requirement: &NodepoolRequirement, measured: &[f64]) -> CheckOutcome {
    match metric {
        Metric::NodeCount => {
            let count = measured.len();
            CheckOutcome::completed(
                count >= requirement.nodes as usize,
                count.to_string(),
                format!(">= {}", requirement.nodes),
            )
        }
        Metric::Cpus => CheckOutcome::completed(
            measured.iter().all(|&cpus| cpus >= f64::from(requirement.cpus)),
            format_list(measured),
            format!(">= {}", requirement.cpus),
        ),
        Metric::Memory | Metric::EphemeralStorage => {
            let required_gib = if metric == Metric::Memory {
                requirement.memory_gib
            } else {
                requirement.disk_space_gib
            };
            let required = required_gib as f64 * GIB;
            CheckOutcome::completed(
                measured
                    .iter()
                    .all(|&bytes| bytes >= required * (1.0 - CAPACITY_TOLERANCE)),
                format_list(measured.iter().map(|&bytes| format_gib(bytes))),
                format!(">= {}", format_gib(required)),
            )
        }
    }
}

struct NodepoolCheck {
    id: &'static str,
    nodepool: &'static str,
    metric: Metric,
    name: String,
    description: String,
}

impl NodepoolCheck {
    fn new(id: &'static str, nodepool: &'static str, metric: Metric) -> Self {
        Self {
            id,
            nodepool,
            metric,
            name: metric.name(nodepool),
            description: metric.description(nodepool),
        }
    }
}

#[async_trait]
impl Check for NodepoolCheck {
    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::Requirements]
    }

    fn skip_dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::Phase, DependencyKey::Requirements]
    }

    /// Sizing is only known once the product is bought, and smaller tiers
    /// have no trucker nodepool.
    fn should_skip(&self, deps: &ResolvedDeps) -> Result<bool> {
        Ok(pre_contract(deps)? || deps.requirements()?.nodepool(self.nodepool).is_none())
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let requirement = deps
            .requirements()?
            .nodepool(self.nodepool)
            .ok_or_else(|| Error::check_fault(self.name.as_str(), "nodepool has no requirement"))?;

        let nodes = list_nodes(deps.client()?, self.nodepool).await?;
        if nodes.is_empty() {
            return Ok(CheckOutcome::major_problem(format!(
                "No nodes with \"{}\" label found",
                self.nodepool
            )));
        }

        // One value per node; the node count only looks at the length
        let measured = match self.metric.capacity_key() {
            Some(key) => node_capacities(&nodes, key)?,
            None => vec![1.0; nodes.len()],
        };
        Ok(evaluate(self.metric, requirement, &measured))
    }
}
