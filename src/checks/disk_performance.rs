//! Disk I/O section: fio random read/write benchmarks
//!
//! Benchmarks saturate the disks they measure, so every check here holds
//! the `storage-benchmark` tag and runs alone.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use serde_json::Value;
use tracing::{debug, warn};

use super::{list_nodes, pre_contract, STORAGE_BENCHMARK_TAG};
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use crate::spawner::Workload;
use compliance_common::kube_utils::exec_in_pod;
use compliance_common::Result;

const POD_STORAGE_ROOT: &str = "$HOME";
const PVC_ROOT: &str = "/mnt";

pub(super) fn section() -> SectionDef {
    let mut section = SectionDef::new("disk_io", "Disk I/O", "Check responsible for determining IOPS.")
        .skip_when(&[DependencyKey::Phase], pre_contract);
    for (id, nodepool) in [
        ("apps_pod_disk", "apps"),
        ("services_pod_disk", "services"),
        ("tools_pod_disk", "tools"),
        ("control_pod_disk", "control"),
        ("clickhouse_pod_disk", "clickhouse"),
    ] {
        section = section.check(move || Box::new(DiskBenchmark::pod_storage(id, nodepool)));
    }
    section.check(|| Box::new(DiskBenchmark::pvc()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    RandRead,
    RandWrite,
}

impl Direction {
    fn fio_mode(self) -> &'static str {
        match self {
            Direction::RandRead => "randread",
            Direction::RandWrite => "randwrite",
        }
    }

    fn report_key(self) -> &'static str {
        match self {
            Direction::RandRead => "read",
            Direction::RandWrite => "write",
        }
    }
}

fn fio_command(root: &str, direction: Direction) -> String {
    format!(
        "fio --output-format=json --filename={}/benchmark.fio --name=test --ioengine=libaio \
         --direct=1 --gtod_reduce=1 --bs=4k --iodepth=64 --size=128Mi --readwrite={}",
        root,
        direction.fio_mode()
    )
}

/// Mean IOPS of the first job in a fio JSON report
fn parse_fio_iops(output: &str, direction: Direction) -> Option<f64> {
    // fio prints warnings before the document
    let document = &output[output.find('{')?..];
    let report: Value = serde_json::from_str(document).ok()?;
    report
        .get("jobs")?
        .get(0)?
        .get(direction.report_key())?
        .get("iops_mean")?
        .as_f64()
}

fn evaluate(measured: &[f64], threshold: u32) -> CheckOutcome {
    match measured.iter().copied().reduce(f64::min) {
        None => CheckOutcome::Skipped,
        Some(min) => CheckOutcome::completed(
            min >= f64::from(threshold),
            min.to_string(),
            format!(">= {}", threshold),
        ),
    }
}

/// Where the benchmark writes
#[derive(Debug, Clone, Copy)]
enum Target {
    /// Container filesystem of the workload pods on the nodepool's nodes
    PodStorage { nodepool: &'static str },
    /// The claim mounted at `/mnt` in every workload pod
    Pvc,
}

struct DiskBenchmark {
    id: &'static str,
    target: Target,
    name: String,
    description: String,
}

impl DiskBenchmark {
    fn pod_storage(id: &'static str, nodepool: &'static str) -> Self {
        let mut title = nodepool.to_string();
        if let Some(first) = title.get_mut(..1) {
            first.make_ascii_uppercase();
        }
        Self {
            id,
            target: Target::PodStorage { nodepool },
            name: format!("{} pod's disk performance", title),
            description: format!(
                "Perform an I/O benchmark on pod's storage (runs on all nodes in the {} nodepool)",
                nodepool
            ),
        }
    }

    fn pvc() -> Self {
        Self {
            id: "pvc",
            target: Target::Pvc,
            name: "PVC performance".to_string(),
            description: "Perform an I/O benchmark on PVC".to_string(),
        }
    }

    fn root(&self) -> &'static str {
        match self.target {
            Target::PodStorage { .. } => POD_STORAGE_ROOT,
            Target::Pvc => PVC_ROOT,
        }
    }

    /// Workload pods the benchmark runs in
    async fn pods(&self, client: &kube::Client, workload: &Workload) -> Result<Vec<String>> {
        let api: Api<Pod> = Api::namespaced(client.clone(), &workload.namespace);
        let selector = workload.label_selector();
        let pods = match self.target {
            Target::Pvc => api.list(&ListParams::default().labels(&selector)).await?.items,
            Target::PodStorage { nodepool } => {
                let mut pods = Vec::new();
                for node in list_nodes(client, &format!("{}=true", nodepool)).await? {
                    let Some(node_name) = node.metadata.name else {
                        continue;
                    };
                    let params = ListParams::default()
                        .labels(&selector)
                        .fields(&format!("spec.nodeName={}", node_name));
                    pods.extend(api.list(&params).await?.items);
                }
                pods
            }
        };
        Ok(pods.into_iter().filter_map(|p| p.metadata.name).collect())
    }
}

#[async_trait]
impl Check for DiskBenchmark {
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
        &[
            DependencyKey::KubeClient,
            DependencyKey::PodWithVolumeOnEachNode,
            DependencyKey::Requirements,
        ]
    }

    fn skip_dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::Requirements]
    }

    /// Nodepools the traffic tier does not define have no IOPS requirement
    fn should_skip(&self, deps: &ResolvedDeps) -> Result<bool> {
        Ok(match self.target {
            Target::PodStorage { nodepool } => deps.requirements()?.nodepool(nodepool).is_none(),
            Target::Pvc => deps.requirements()?.pvcs.is_empty(),
        })
    }

    fn exclusive_tag(&self) -> Option<&'static str> {
        Some(STORAGE_BENCHMARK_TAG)
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let requirements = deps.requirements()?;
        let threshold = match self.target {
            Target::PodStorage { nodepool } => requirements.nodepool(nodepool).map_or(0, |n| n.iops),
            Target::Pvc => requirements.max_pvc_iops(),
        };
        let client = deps.client()?;
        let workload = deps.workload(DependencyKey::PodWithVolumeOnEachNode)?;

        let pods = self.pods(client, workload).await?;
        if pods.is_empty() {
            warn!(check = %self.name, "No pods match the benchmark target");
        }

        let mut measured = Vec::new();
        for direction in [Direction::RandWrite, Direction::RandRead] {
            for pod in &pods {
                let output =
                    exec_in_pod(client, &workload.namespace, pod, &fio_command(self.root(), direction))
                        .await?;
                let Some(iops) = parse_fio_iops(&output, direction) else {
                    debug!(pod = %pod, output = %output, "Unparseable fio output");
                    return Ok(CheckOutcome::major_problem("Failed to parse fio output"));
                };
                measured.push(iops);
            }
        }
        Ok(evaluate(&measured, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIO: &str = r#"fio: this platform does not support process shared mutexes
{
  "fio version" : "fio-3.28",
  "jobs" : [
    {
      "jobname" : "test",
      "read" : { "iops_mean" : 0.0 },
      "write" : { "iops_mean" : 1523.25 }
    }
  ]
}"#;

    #[test]
    fn test_fio_command_targets_root() {
        let cmd = fio_command(PVC_ROOT, Direction::RandRead);
        assert!(cmd.starts_with("fio --output-format=json --filename=/mnt/benchmark.fio"));
        assert!(cmd.ends_with("--readwrite=randread"));
    }

    #[test]
    fn test_parse_fio_skips_leading_warnings() {
        assert_eq!(parse_fio_iops(FIO, Direction::RandWrite), Some(1523.25));
        assert_eq!(parse_fio_iops(FIO, Direction::RandRead), Some(0.0));
        assert_eq!(parse_fio_iops("fio: permission denied", Direction::RandRead), None);
    }

    #[test]
    fn test_lowest_measurement_decides() {
        assert_eq!(
            evaluate(&[812.5, 498.0, 1200.0], 500),
            CheckOutcome::completed(false, "498", ">= 500")
        );
        assert_eq!(evaluate(&[], 500), CheckOutcome::Skipped);
    }

    #[test]
    fn test_names_follow_nodepool() {
        let check = DiskBenchmark::pod_storage("apps_pod_disk", "apps");
        assert_eq!(check.name(), "Apps pod's disk performance");
        assert_eq!(check.exclusive_tag(), Some(STORAGE_BENCHMARK_TAG));
        assert_eq!(DiskBenchmark::pvc().root(), "/mnt");
    }
}
