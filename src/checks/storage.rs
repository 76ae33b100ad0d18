//! Storage section: dynamic provisioning and resource quotas

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ResourceQuota;
use kube::api::{Api, ListParams};

use super::yes_no;
use crate::deps::{DependencyKey, ResolvedDeps};
use crate::manifest::{self, StatefulSetBuilder};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use compliance_common::kube_utils::{exec_in_pod, parse_quantity};
use compliance_common::Result;

const PVC_COUNT_QUOTA: &str = "persistentvolumeclaims";
const PVC_STORAGE_QUOTA: &str = "requests.storage";

pub(super) fn section() -> SectionDef {
    SectionDef::new("storage", "Storage", "Checks related to persistent storage")
        .check(|| Box::new(RequestingPvc))
        .check(|| Box::new(QuotaForPvcCount))
        .check(|| Box::new(QuotaForPvcSize))
}

/// Smallest hard limit set for `key` by any quota, with its original text
fn tightest_quota(quotas: &[ResourceQuota], key: &str) -> Result<Option<(f64, String)>> {
    let mut tightest: Option<(f64, String)> = None;
    for quantity in quotas
        .iter()
        .filter_map(|q| q.spec.as_ref()?.hard.as_ref()?.get(key))
    {
        let value = parse_quantity(&quantity.0)?;
        if tightest.as_ref().map_or(true, |(min, _)| value < *min) {
            tightest = Some((value, quantity.0.clone()));
        }
    }
    Ok(tightest)
}

async fn list_quotas(client: &kube::Client) -> Result<Vec<ResourceQuota>> {
    let api: Api<ResourceQuota> = Api::all(client.clone());
    Ok(api.list(&ListParams::default()).await?.items)
}

struct RequestingPvc;

impl RequestingPvc {
    const NAME: &'static str = "request-pvc";
}

#[async_trait]
impl Check for RequestingPvc {
    fn id(&self) -> &'static str {
        "requesting_pvc"
    }

    fn name(&self) -> &str {
        "Requesting PVC"
    }

    fn description(&self) -> &str {
        "Ensures that disk space may be requested on demand."
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[
            DependencyKey::KubeClient,
            DependencyKey::Spawner,
            DependencyKey::RegistrySecret,
            DependencyKey::ToolsImage,
            DependencyKey::StorageClass,
        ]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let storage_class = deps.text(DependencyKey::StorageClass)?;
        let claim = manifest::persistent_volume_claim(
            "mnt",
            "1Gi",
            Some(storage_class).filter(|s| !s.is_empty()),
        )?;
        let stateful_set = StatefulSetBuilder::new(Self::NAME, deps.text(DependencyKey::ToolsImage)?)
            .pull_secret(deps.registry_secret()?.name.clone())
            .mount("/mnt", claim)
            .build()?;

        let mut scope = deps.spawner()?.scope(self.id());
        let workload = scope.acquire_stateful_set(stateful_set).await?;
        let output = exec_in_pod(
            deps.client()?,
            &workload.namespace,
            &format!("{}-0", workload.name),
            "mountpoint /mnt",
        )
        .await;
        scope.release().await;

        let mounted = output?.contains("is a mountpoint");
        Ok(CheckOutcome::completed(mounted, yes_no(mounted), "Yes"))
    }
}

struct QuotaForPvcCount;

#[async_trait]
impl Check for QuotaForPvcCount {
    fn id(&self) -> &'static str {
        "quota_pvc_count"
    }

    fn name(&self) -> &str {
        "Quota for PVC count"
    }

    fn description(&self) -> &str {
        "Checks if we can request enough PVCs needed for the product."
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::Requirements]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let needed = deps.requirements()?.pvcs.len();
        let quotas = list_quotas(deps.client()?).await?;
        Ok(match tightest_quota(&quotas, PVC_COUNT_QUOTA)? {
            None => CheckOutcome::Skipped,
            Some((limit, text)) => {
                CheckOutcome::completed(limit >= needed as f64, text, format!(">= {}", needed))
            }
        })
    }
}

struct QuotaForPvcSize;

#[async_trait]
impl Check for QuotaForPvcSize {
    fn id(&self) -> &'static str {
        "quota_pvc_size"
    }

    fn name(&self) -> &str {
        "Quota for PVC size"
    }

    fn description(&self) -> &str {
        "Checks if we can request large enough PVC to cover all product requirements."
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::Requirements]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let needed_gib = deps.requirements()?.total_pvc_gib();
        let quotas = list_quotas(deps.client()?).await?;
        Ok(match tightest_quota(&quotas, PVC_STORAGE_QUOTA)? {
            None => CheckOutcome::Skipped,
            Some((limit, text)) => CheckOutcome::completed(
                limit >= needed_gib as f64 * 1024f64.powi(3),
                text,
                format!(">= {}Gi", needed_gib),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ResourceQuotaSpec;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn quota(hard: &[(&str, &str)]) -> ResourceQuota {
        ResourceQuota {
            spec: Some(ResourceQuotaSpec {
                hard: Some(
                    hard.iter()
                        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_tightest_quota_wins() {
        let quotas = [
            quota(&[(PVC_COUNT_QUOTA, "20"), (PVC_STORAGE_QUOTA, "1Ti")]),
            quota(&[("pods", "10")]),
            quota(&[(PVC_COUNT_QUOTA, "5"), (PVC_STORAGE_QUOTA, "900Gi")]),
        ];
        assert_eq!(
            tightest_quota(&quotas, PVC_COUNT_QUOTA).unwrap(),
            Some((5.0, "5".to_string()))
        );
        let (bytes, text) = tightest_quota(&quotas, PVC_STORAGE_QUOTA).unwrap().unwrap();
        assert_eq!(text, "900Gi");
        assert_eq!(bytes, 900.0 * 1024f64.powi(3));
    }

    #[test]
    fn test_no_quota_means_nothing_to_check() {
        let quotas = [quota(&[("pods", "10")]), ResourceQuota::default()];
        assert_eq!(tightest_quota(&quotas, PVC_COUNT_QUOTA).unwrap(), None);
    }

    #[test]
    fn test_malformed_quota_is_an_error() {
        let quotas = [quota(&[(PVC_STORAGE_QUOTA, "lots")])];
        assert!(tightest_quota(&quotas, PVC_STORAGE_QUOTA).is_err());
    }
}
