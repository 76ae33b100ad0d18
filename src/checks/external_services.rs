//! External services section: what the cluster can reach outside itself

use async_trait::async_trait;
use tracing::warn;

use super::{pre_contract, yes_no};
use crate::config::MaintenanceType;
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::manifest::StatefulSetBuilder;
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use compliance_common::kube_utils::exec_in_pod;
use compliance_common::{Error, Result};

const PAGERDUTY_STATUS_URL: &str = "https://status.pagerduty.com/api/v2/status.json";

/// Image pulled to prove registry access
const REGISTRY_PULL_IMAGE: &str = "framework/backup-tools:1.2.0";

pub(super) fn section() -> SectionDef {
    SectionDef::new(
        "external_services",
        "External services",
        "Checks related to access to external services",
    )
    .check(|| Box::new(PagerDutyAccess))
    .check(|| Box::new(RegistryAccess))
}

struct PagerDutyAccess;

#[async_trait]
impl Check for PagerDutyAccess {
    fn id(&self) -> &'static str {
        "pagerduty"
    }

    fn name(&self) -> &str {
        "PagerDuty access"
    }

    fn description(&self) -> &str {
        "Check if cluster has access to PagerDuty"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::SinglePod]
    }

    fn skip_dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::Offline, DependencyKey::MaintenanceType]
    }

    /// Alerts only go out for remotely maintained, online installations
    fn should_skip(&self, deps: &ResolvedDeps) -> Result<bool> {
        Ok(deps.offline()? || deps.maintenance_type()? == MaintenanceType::SelfSupport)
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let workload = deps.workload(DependencyKey::SinglePod)?;
        let status = exec_in_pod(
            deps.client()?,
            &workload.namespace,
            &format!("{}-0", workload.name),
            &format!("curl -s -o /dev/null -w \"%{{http_code}}\" {}", PAGERDUTY_STATUS_URL),
        )
        .await?;

        let reachable = status == "200";
        Ok(CheckOutcome::completed(reachable, yes_no(reachable), "Yes"))
    }
}

struct RegistryAccess;

#[async_trait]
impl Check for RegistryAccess {
    fn id(&self) -> &'static str {
        "registry"
    }

    fn name(&self) -> &str {
        "Registry/ACR access"
    }

    fn description(&self) -> &str {
        "Check if kubernetes can pull Piwik PRO images from ACR or other registry"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[
            DependencyKey::Spawner,
            DependencyKey::RegistrySecret,
            DependencyKey::RegistryServer,
        ]
    }

    fn skip_dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::Phase]
    }

    fn should_skip(&self, deps: &ResolvedDeps) -> Result<bool> {
        pre_contract(deps)
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let image = format!(
            "{}/{}",
            deps.text(DependencyKey::RegistryServer)?.trim_end_matches('/'),
            REGISTRY_PULL_IMAGE
        );
        let stateful_set = StatefulSetBuilder::new("backup-tools", image)
            .pull_secret(deps.registry_secret()?.name.clone())
            .build()?;

        let mut scope = deps.spawner()?.scope(self.id());
        match scope.acquire_stateful_set(stateful_set).await {
            Ok(_) => {
                scope.release().await;
                Ok(CheckOutcome::completed(true, "Yes", "Yes"))
            }
            Err(e @ Error::Acquisition { .. }) => {
                warn!(error = %e, "Registry image could not be started");
                Ok(CheckOutcome::major_problem("Cannot access registry"))
            }
            Err(e) => Err(e),
        }
    }
}
