//! Factories of the built-in dependencies

use std::sync::Arc;

use futures::FutureExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use tracing::info;

use super::{Cost, Dependency, DependencyKey, Resolver};
use crate::config::CheckerConfig;
use crate::manifest::{self, StatefulSetBuilder};
use crate::requirements::HardwareRequirements;
use crate::spawner::{KubeClusterOps, ResourceRef, Spawner, SpawnerConfig};
use compliance_common::kube_utils::{check_api_health, create_client};
use compliance_common::{Error, Result};

/// Name of the image pull secret the workloads reference
pub const REGISTRY_SECRET_NAME: &str = "piwik-pro-registry";

/// Size of the claim mounted by `PodWithVolumeOnEachNode`
const WORKLOAD_VOLUME_SIZE: &str = "1Gi";

/// Build the resolver for a run of the built-in checks.
///
/// Configuration values are registered as cheap values. Everything touching
/// the cluster is constructed on first use.
pub fn standard_resolver(config: &CheckerConfig) -> Resolver {
    use DependencyKey as K;

    let mut resolver = Resolver::new();
    resolver.register_value(K::Offline, Dependency::Flag(config.offline));
    resolver.register_value(K::MonthlyTraffic, Dependency::MonthlyTraffic(config.monthly_traffic));
    resolver.register_value(
        K::MaintenanceType,
        Dependency::MaintenanceType(config.maintenance_type),
    );
    resolver.register_value(K::Phase, Dependency::Phase(config.phase));
    resolver.register_value(
        K::Requirements,
        Dependency::Requirements(Arc::new(HardwareRequirements::for_traffic(
            config.monthly_traffic,
        ))),
    );
    resolver.register_value(
        K::NamespaceWhitelist,
        Dependency::List(config.namespace_whitelist.clone()),
    );
    resolver.register_value(
        K::StorageClass,
        Dependency::Text(config.storage_class.clone().unwrap_or_default()),
    );
    resolver.register_value(
        K::RegistryServer,
        Dependency::Text(config.registry.server.clone()),
    );
    resolver.register_value(K::ToolsImage, Dependency::Text(config.tools_image.clone()));
    resolver.register_value(K::Namespace, Dependency::Text(config.namespace.clone()));

    let kubeconfig = config.kubeconfig.clone();
    resolver.register_foundational(K::KubeClient, move |_| {
        let kubeconfig = kubeconfig.clone();
        async move {
            let client = create_client(kubeconfig.as_deref()).await?;
            let version = check_api_health(&client).await?;
            info!(version = %version, "Connected to cluster");
            Ok(Dependency::Client(client))
        }
        .boxed()
    });

    let spawner_config = SpawnerConfig {
        ready_timeout: config.ready_timeout,
        ..SpawnerConfig::new(config.namespace.clone())
    };
    resolver.register_factory(K::Spawner, Cost::Expensive, move |r| {
        let spawner_config = spawner_config.clone();
        async move {
            let client = client_of(r).await?;
            let ops = Arc::new(KubeClusterOps::new(client));
            Ok(Dependency::Spawner(Arc::new(Spawner::new(ops, spawner_config))))
        }
        .boxed()
    });

    let docker_config = config.registry.docker_config_json();
    resolver.register_factory(K::RegistrySecret, Cost::Expensive, move |r| {
        let docker_config = docker_config.clone();
        async move {
            let spawner = spawner_of(r).await?;
            let manifest = docker_config
                .map(|json| manifest::registry_secret(REGISTRY_SECRET_NAME, json))
                .transpose()?;
            let mut scope = spawner.scope(K::RegistrySecret.as_str());
            let secret = scope.acquire_secret(REGISTRY_SECRET_NAME, manifest).await?;
            r.adopt(scope);
            Ok(Dependency::Secret(Arc::new(secret)))
        }
        .boxed()
    });

    let workloads = [
        (K::SinglePod, "single-pod", false, false),
        (K::PodOnEachNode, "pod-on-each-node", true, false),
        (K::PodWithVolumeOnEachNode, "pod-with-volume-on-each-node", true, true),
    ];
    for (key, name, per_node, with_volume) in workloads {
        let spec = WorkloadSpec {
            key,
            name,
            per_node,
            volume: with_volume.then(|| config.storage_class.clone()),
            image: config.tools_image.clone(),
        };
        resolver.register_factory(key, Cost::Expensive, move |r| {
            let spec = spec.clone();
            async move { tools_workload(r, spec).await }.boxed()
        });
    }

    resolver
}

#[derive(Clone)]
struct WorkloadSpec {
    key: DependencyKey,
    name: &'static str,
    per_node: bool,
    /// Storage class of the mounted claim when the workload has one
    volume: Option<Option<String>>,
    image: String,
}

async fn tools_workload(r: &Resolver, spec: WorkloadSpec) -> Result<Dependency> {
    let spawner = spawner_of(r).await?;
    let secret = secret_of(r).await?;
    let replicas = if spec.per_node {
        count_nodes(&client_of(r).await?).await?
    } else {
        1
    };

    let mut builder = StatefulSetBuilder::new(spec.name, spec.image)
        .replicas(replicas)
        .pull_secret(secret.name.clone());
    if let Some(storage_class) = &spec.volume {
        let claim = manifest::persistent_volume_claim(
            "mnt",
            WORKLOAD_VOLUME_SIZE,
            storage_class.as_deref(),
        )?;
        builder = builder.mount("/mnt", claim);
    }
    let manifest = builder.build()?;

    let mut scope = spawner.scope(spec.key.as_str());
    let workload = scope.acquire_stateful_set(manifest).await?;
    r.adopt(scope);
    Ok(Dependency::Workload(Arc::new(workload)))
}

async fn count_nodes(client: &kube::Client) -> Result<i32> {
    let nodes: Api<Node> = Api::all(client.clone());
    let count = nodes.list(&ListParams::default()).await?.items.len();
    if count == 0 {
        return Err(Error::internal_with_context("count_nodes", "cluster has no nodes"));
    }
    i32::try_from(count).map_err(|_| Error::internal_with_context("count_nodes", "too many nodes"))
}

async fn client_of(r: &Resolver) -> Result<kube::Client> {
    match r.resolve(DependencyKey::KubeClient).await? {
        Dependency::Client(client) => Ok(client),
        other => Err(Error::internal(format!("expected a client, got {:?}", other))),
    }
}

async fn spawner_of(r: &Resolver) -> Result<Arc<Spawner>> {
    match r.resolve(DependencyKey::Spawner).await? {
        Dependency::Spawner(spawner) => Ok(spawner),
        other => Err(Error::internal(format!("expected a spawner, got {:?}", other))),
    }
}

async fn secret_of(r: &Resolver) -> Result<Arc<ResourceRef>> {
    match r.resolve(DependencyKey::RegistrySecret).await? {
        Dependency::Secret(secret) => Ok(secret),
        other => Err(Error::internal(format!("expected a secret, got {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Phase;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_configuration_values_are_cheap() {
        let config = CheckerConfig {
            offline: true,
            phase: Phase::PreInstall,
            storage_class: Some("fast".to_string()),
            ..Default::default()
        };
        let resolver = standard_resolver(&config);

        let deps = resolver
            .resolve_cheap(&[
                DependencyKey::Offline,
                DependencyKey::Phase,
                DependencyKey::StorageClass,
                DependencyKey::Requirements,
            ])
            .await
            .unwrap();
        assert!(deps.offline().unwrap());
        assert_eq!(deps.phase().unwrap(), Phase::PreInstall);
        assert_eq!(deps.text(DependencyKey::StorageClass).unwrap(), "fast");
        assert!(deps.requirements().unwrap().nodepool("apps").is_some());
    }

    #[tokio::test]
    async fn test_cluster_dependencies_are_expensive() {
        let resolver = standard_resolver(&CheckerConfig::default());
        for key in [
            DependencyKey::KubeClient,
            DependencyKey::Spawner,
            DependencyKey::RegistrySecret,
            DependencyKey::SinglePod,
            DependencyKey::PodOnEachNode,
            DependencyKey::PodWithVolumeOnEachNode,
        ] {
            assert_eq!(resolver.cost(key), Some(Cost::Expensive), "{}", key);
        }
        assert!(resolver.resolve_cheap(&[DependencyKey::KubeClient]).await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_kubeconfig_is_foundational() {
        let config = CheckerConfig {
            kubeconfig: Some("/nonexistent/kubeconfig".into()),
            ..Default::default()
        };
        let resolver = standard_resolver(&config);

        let keys = BTreeSet::from([DependencyKey::Spawner]);
        let (_, failures) = resolver.resolve_all(&keys).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.to_string().contains("kubeconfig"));

        let foundational = resolver.foundational_failure().unwrap();
        assert!(foundational.is_foundational());
    }
}
