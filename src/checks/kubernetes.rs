//! Kubernetes section: control plane version, privileges, CNI and namespaces

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use semver::Version;
use tracing::debug;

use crate::deps::{DependencyKey, ResolvedDeps};
use crate::registry::{Check, SectionDef};
use crate::report::CheckOutcome;
use compliance_common::Result;

const MIN_KUBERNETES_VERSION: &str = "v1.21.0";
const MAX_KUBERNETES_VERSION: &str = "v1.24.0";
const MIN_CALICO_VERSION: &str = "v3.22";

/// Namespaces a fresh cluster with Calico is expected to have
pub const DEFAULT_NAMESPACE_WHITELIST: &[&str] = &[
    "default",
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "calico-system",
    "tigera-operator",
    "calico-apiserver",
];

pub(super) fn section() -> SectionDef {
    SectionDef::new("kubernetes", "Kubernetes", "Checks related to kubernetes settings")
        .check(|| Box::new(KubernetesVersion))
        .check(|| Box::new(ClusterAdminPrivileges))
        .check(|| Box::new(CalicoVersion))
        .check(|| Box::new(Namespaces))
}

/// Parse `v1.23.5`, `1.23.5-gke.100` or `v3.22` leniently.
///
/// Pre-release and build suffixes are dropped so vendor builds compare as
/// their upstream release; a missing patch component counts as zero.
pub(crate) fn parse_version(raw: &str) -> Option<Version> {
    let core = raw
        .trim()
        .trim_start_matches('v')
        .split(|c: char| c == '-' || c == '+')
        .next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    if parts.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, patch))
}

fn evaluate_kubernetes_version(measured: &str) -> CheckOutcome {
    let expected = format!(">{} and <{}", MIN_KUBERNETES_VERSION, MAX_KUBERNETES_VERSION);
    let bounds = parse_version(MIN_KUBERNETES_VERSION).zip(parse_version(MAX_KUBERNETES_VERSION));
    match (parse_version(measured), bounds) {
        (Some(version), Some((min, max))) => {
            CheckOutcome::completed(min <= version && version <= max, measured, expected)
        }
        _ => CheckOutcome::major_problem(format!("Unrecognised Kubernetes version {}", measured)),
    }
}

fn evaluate_calico_version(measured: &str) -> CheckOutcome {
    let expected = format!("> {}", MIN_CALICO_VERSION);
    match (parse_version(measured), parse_version(MIN_CALICO_VERSION)) {
        (Some(version), Some(min)) => CheckOutcome::completed(version > min, measured, expected),
        _ => CheckOutcome::major_problem(format!("Unrecognised Calico version {}", measured)),
    }
}

fn evaluate_namespaces(
    actual: impl IntoIterator<Item = String>,
    extra_whitelist: &[String],
) -> CheckOutcome {
    let allowed: BTreeSet<String> = DEFAULT_NAMESPACE_WHITELIST
        .iter()
        .map(|ns| ns.to_string())
        .chain(extra_whitelist.iter().cloned())
        .collect();
    let unexpected: Vec<String> = actual
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|ns| !allowed.contains(ns))
        .collect();

    let measured = if unexpected.is_empty() {
        String::new()
    } else {
        format!("Unexpected: {}", unexpected.join(", "))
    };
    let expected = format!(
        "Allowed: {}",
        allowed.into_iter().collect::<Vec<_>>().join(", ")
    );
    CheckOutcome::completed(unexpected.is_empty(), measured, expected)
}

struct KubernetesVersion;

#[async_trait]
impl Check for KubernetesVersion {
    fn id(&self) -> &'static str {
        "version"
    }

    fn name(&self) -> &str {
        "Kubernetes version"
    }

    fn description(&self) -> &str {
        "Ensures that kubernetes has supported version"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let info = deps.client()?.apiserver_version().await?;
        Ok(evaluate_kubernetes_version(&info.git_version))
    }
}

struct ClusterAdminPrivileges;

#[async_trait]
impl Check for ClusterAdminPrivileges {
    fn id(&self) -> &'static str {
        "cluster_admin"
    }

    fn name(&self) -> &str {
        "Cluster Admin privileges"
    }

    fn description(&self) -> &str {
        "Ensures that we have Cluster Admin level privileges"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let reviews: Api<SelfSubjectAccessReview> = Api::all(deps.client()?.clone());
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    resource: Some("*".to_string()),
                    verb: Some("*".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let review = reviews.create(&PostParams::default(), &review).await?;
        let allowed = review.status.map(|s| s.allowed).unwrap_or(false);
        Ok(CheckOutcome::completed(allowed, super::yes_no(allowed), "Yes"))
    }
}

struct CalicoVersion;

impl CalicoVersion {
    fn api_resource() -> ApiResource {
        ApiResource {
            group: "crd.projectcalico.org".to_string(),
            version: "v1".to_string(),
            api_version: "crd.projectcalico.org/v1".to_string(),
            kind: "ClusterInformation".to_string(),
            plural: "clusterinformations".to_string(),
        }
    }
}

#[async_trait]
impl Check for CalicoVersion {
    fn id(&self) -> &'static str {
        "calico_version"
    }

    fn name(&self) -> &str {
        "Calico version"
    }

    fn description(&self) -> &str {
        "Ensures that a supported version of Calico is running"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let api: Api<DynamicObject> = Api::all_with(deps.client()?.clone(), &Self::api_resource());
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                debug!(error = %e, "Listing Calico cluster information failed");
                return Ok(CheckOutcome::major_problem("Calico information not found"));
            }
        };

        let version = list.items.first().and_then(|info| {
            info.data
                .get("spec")
                .and_then(|spec| spec.get("calicoVersion"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        Ok(match version {
            Some(version) => evaluate_calico_version(&version),
            None => CheckOutcome::major_problem("Calico information not found"),
        })
    }
}

struct Namespaces;

#[async_trait]
impl Check for Namespaces {
    fn id(&self) -> &'static str {
        "namespaces"
    }

    fn name(&self) -> &str {
        "Namespaces"
    }

    fn description(&self) -> &str {
        "Check if there are no unexpected namespaces"
    }

    fn dependencies(&self) -> &[DependencyKey] {
        &[DependencyKey::KubeClient, DependencyKey::NamespaceWhitelist]
    }

    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome> {
        let api: Api<Namespace> = Api::all(deps.client()?.clone());
        let names = api
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name);
        Ok(evaluate_namespaces(names, deps.list(DependencyKey::NamespaceWhitelist)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing_is_lenient() {
        assert_eq!(parse_version("v1.23.5"), Some(Version::new(1, 23, 5)));
        assert_eq!(parse_version("v1.22.17-gke.1900"), Some(Version::new(1, 22, 17)));
        assert_eq!(parse_version("v1.21.2+k3s1"), Some(Version::new(1, 21, 2)));
        assert_eq!(parse_version("v3.22"), Some(Version::new(3, 22, 0)));
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
    }

    #[test]
    fn test_kubernetes_version_bounds_are_inclusive() {
        for (version, pass) in [
            ("v1.20.15", false),
            ("v1.21.0", true),
            ("v1.23.5", true),
            ("v1.24.0", true),
            ("v1.24.1", false),
        ] {
            assert_eq!(
                evaluate_kubernetes_version(version),
                CheckOutcome::completed(pass, version, ">v1.21.0 and <v1.24.0"),
                "{}",
                version
            );
        }
        assert!(matches!(
            evaluate_kubernetes_version("garbage"),
            CheckOutcome::MajorProblem { .. }
        ));
    }

    #[test]
    fn test_calico_must_be_newer_than_minimum() {
        assert_eq!(
            evaluate_calico_version("v3.22.0"),
            CheckOutcome::completed(false, "v3.22.0", "> v3.22")
        );
        assert_eq!(
            evaluate_calico_version("v3.23.1"),
            CheckOutcome::completed(true, "v3.23.1", "> v3.22")
        );
    }

    #[test]
    fn test_namespaces_outside_whitelist_fail() {
        let actual = ["default", "kube-system", "legacy", "argo"].map(String::from);
        let outcome = evaluate_namespaces(actual, &["argo".to_string()]);
        match outcome {
            CheckOutcome::Completed {
                result,
                measured,
                expected,
            } => {
                assert!(!result);
                assert_eq!(measured, "Unexpected: legacy");
                assert!(expected.starts_with("Allowed: argo, calico-apiserver"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_default_namespaces_pass() {
        let actual = DEFAULT_NAMESPACE_WHITELIST.iter().map(|ns| ns.to_string());
        assert!(matches!(
            evaluate_namespaces(actual, &[]),
            CheckOutcome::Completed { result: true, .. }
        ));
    }
}
