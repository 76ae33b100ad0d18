//! Kernel section: sysctl values on every node

use async_trait::async_trait;

use super::{exec_on_each_pod, format_list};
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use compliance_common::{Error, Result};

pub(super) fn section() -> SectionDef {
    SectionDef::new("kernel", "Kernel", "Checks related to kernel parameters")
        .check(|| {
            Box::new(SysctlMinimum {
                id: "max_user_watches",
                variable: "fs.inotify.max_user_watches",
                minimum: 65536,
            })
        })
        .check(|| {
            Box::new(SysctlMinimum {
                id: "max_user_instances",
                variable: "fs.inotify.max_user_instances",
                minimum: 1024,
            })
        })
}

/// Value of `sysctl <variable>` output, e.g. `fs.inotify.max_user_watches = 8192`
fn parse_sysctl(output: &str) -> Option<u64> {
    output.split_whitespace().last()?.parse().ok()
}

/// A sysctl variable that must be at least `minimum` on every node
struct SysctlMinimum {
    id: &'static str,
    variable: &'static str,
    minimum: u64,
}

#[async_trait]
impl Check for SysctlMinimum {
    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &str {
        self.variable
    }

    fn description(&self) -> &str {
        "Checks the kernel value for each kubernetes node"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::PodOnEachNode]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let workload = deps.workload(DependencyKey::PodOnEachNode)?;
        let outputs = exec_on_each_pod(
            deps.client()?,
            workload,
            &format!("sysctl {}", self.variable),
        )
        .await?;

        let values = outputs
            .iter()
            .map(|output| {
                parse_sysctl(output).ok_or_else(|| {
                    Error::check_fault(self.variable, format!("unexpected sysctl output {:?}", output))
                })
            })
            .collect::<Result<Vec<u64>>>()?;

        Ok(CheckOutcome::completed(
            values.iter().all(|&v| v >= self.minimum),
            format_list(&values),
            format!(">= {}", self.minimum),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sysctl_output() {
        assert_eq!(parse_sysctl("fs.inotify.max_user_watches = 524288"), Some(524288));
        assert_eq!(parse_sysctl("fs.inotify.max_user_instances = 128\n"), Some(128));
        assert_eq!(parse_sysctl("sysctl: cannot stat /proc/sys/fs/x"), None);
        assert_eq!(parse_sysctl(""), None);
    }
}
