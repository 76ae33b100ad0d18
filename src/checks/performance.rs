//! Performance section: CPU headroom on every node

use async_trait::async_trait;
use serde_json::Value;

use super::{exec_on_each_pod, format_list, pre_contract, STORAGE_BENCHMARK_TAG};
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use compliance_common::Result;

/// Highest acceptable user-space CPU usage, in percent
const USER_CPU_THRESHOLD: f64 = 5.0;

/// Five samples, two seconds apart
const MPSTAT_COMMAND: &str = "mpstat 2 5 -o JSON";

pub(super) fn section() -> SectionDef {
    SectionDef::new(
        "performance",
        "Performance",
        "Checks responsible for ensuring that cluster has enough performance to handle PPAS",
    )
    .skip_when(&[DependencyKey::Phase], pre_contract)
    .check(|| Box::new(NoisyNeighbours))
}

/// Peak user CPU over all samples of one `mpstat -o JSON` report
fn peak_user_cpu(output: &str) -> Option<f64> {
    let report: Value = serde_json::from_str(output).ok()?;
    report
        .pointer("/sysstat/hosts/0/statistics")?
        .as_array()?
        .iter()
        .map(|sample| sample.pointer("/cpu-load/0/usr")?.as_f64())
        .collect::<Option<Vec<f64>>>()?
        .into_iter()
        .reduce(f64::max)
}

struct NoisyNeighbours;

#[async_trait]
impl Check for NoisyNeighbours {
    fn id(&self) -> &'static str {
        "noisy_neighbours"
    }

    fn name(&self) -> &str {
        "No noisy neighbours"
    }

    fn description(&self) -> &str {
        "Check that the cluster is not overloaded to ensure that the product will have enough \
         resources to run properly. Result is percentage of CPU usage for user space processes."
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::PodOnEachNode]
    }

    // mpstat would report the fio load as noise
    fn exclusive_tag(&self) -> Option<&'static str> {
        Some(STORAGE_BENCHMARK_TAG)
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let workload = deps.workload(DependencyKey::PodOnEachNode)?;
        let outputs = exec_on_each_pod(deps.client()?, workload, MPSTAT_COMMAND).await?;

        let Some(peaks) = outputs
            .iter()
            .map(|output| peak_user_cpu(output))
            .collect::<Option<Vec<f64>>>()
        else {
            return Ok(CheckOutcome::major_problem("Failed to parse mpstat output"));
        };

        Ok(CheckOutcome::completed(
            peaks.iter().all(|&usage| usage < USER_CPU_THRESHOLD),
            format_list(&peaks),
            format!("< {}", USER_CPU_THRESHOLD),
        ))
    }
}
