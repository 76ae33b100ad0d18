//! Resource spawner
//!
//! Creates ephemeral objects for checks and guarantees they are deleted on
//! every exit path. All objects belong to a [`ResourceScope`]:
//!
//! - `release()` deletes them in reverse creation order, each exactly once,
//!   with bounded retry.
//! - A failed acquisition deletes everything the scope created so far before
//!   returning the error, which makes a sequence of acquisitions all-or-nothing.
//! - Dropping a scope without releasing it (timeout abort, cancellation,
//!   panic) hands the remaining objects to a background cleanup tracked by
//!   the [`Spawner`]; [`Spawner::wait_for_cleanup`] waits for those.
//!
//! Cleanup failures are logged as warnings and never fail the check.

mod cluster;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::manifest::{
    PvcManifest, ResourceKind, SecretManifest, ServiceManifest, StatefulSetManifest,
};
use compliance_common::kube_utils::{wait_for_resource, DEFAULT_POLL_INTERVAL};
use compliance_common::retry::{retry_with_backoff, RetryConfig};
use compliance_common::{Error, Result, APP_LABEL};

pub use cluster::{ClusterObject, ClusterOps, KubeClusterOps, ResourceRef};
#[cfg(test)]
pub use cluster::MockClusterOps;

/// Default bound on how long a workload may take to become ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Spawner settings
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Namespace objects are created in
    pub namespace: String,
    /// Bound on waiting for a StatefulSet to become ready
    pub ready_timeout: Duration,
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// Retry policy for deletions
    pub cleanup_retry: RetryConfig,
}

impl SpawnerConfig {
    /// Defaults for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_retry: RetryConfig::cleanup(),
        }
    }
}

/// A ready StatefulSet owned by a scope
#[derive(Debug, Clone)]
pub struct Workload {
    /// StatefulSet name, also the `app` label of its pods
    pub name: String,
    /// Namespace of the StatefulSet
    pub namespace: String,
    /// Number of ready pods
    pub replicas: i32,
    /// Last observed object
    pub stateful_set: StatefulSet,
}

impl Workload {
    /// Pod names, `<name>-0` to `<name>-<replicas-1>`
    pub fn pod_names(&self) -> Vec<String> {
        (0..self.replicas)
            .map(|i| format!("{}-{}", self.name, i))
            .collect()
    }

    /// Label selector matching the pods
    pub fn label_selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.name)
    }
}

fn is_ready(stateful_set: &StatefulSet) -> bool {
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready == desired
}

/// Creates resource scopes and tracks their background cleanups
pub struct Spawner {
    ops: Arc<dyn ClusterOps>,
    config: Arc<SpawnerConfig>,
    cleanups: TaskTracker,
}

impl Spawner {
    /// Spawner creating objects through `ops`
    pub fn new(ops: Arc<dyn ClusterOps>, config: SpawnerConfig) -> Self {
        Self {
            ops,
            config: Arc::new(config),
            cleanups: TaskTracker::new(),
        }
    }

    /// Namespace objects are created in
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Open an empty scope. `owner` names the check or dependency in logs.
    pub fn scope(&self, owner: impl Into<String>) -> ResourceScope {
        ResourceScope {
            owner: owner.into(),
            ops: self.ops.clone(),
            config: self.config.clone(),
            cleanups: self.cleanups.clone(),
            created: Vec::new(),
        }
    }

    /// Number of background cleanups still running
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.len()
    }

    /// Wait until every background cleanup has finished
    pub async fn wait_for_cleanup(&self) {
        self.cleanups.close();
        self.cleanups.wait().await;
        self.cleanups.reopen();
    }
}

/// Objects created on behalf of one owner
pub struct ResourceScope {
    owner: String,
    ops: Arc<dyn ClusterOps>,
    config: Arc<SpawnerConfig>,
    cleanups: TaskTracker,
    created: Vec<ResourceRef>,
}

impl ResourceScope {
    /// Owner of the scope
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Objects currently owned, in creation order
    pub fn resources(&self) -> &[ResourceRef] {
        &self.created
    }

    /// Create a Service
    pub async fn acquire_service(&mut self, manifest: ServiceManifest) -> Result<ResourceRef> {
        self.create(ClusterObject::Service(manifest.0)).await
    }

    /// Create a standalone PVC.
    ///
    /// Claims are not waited on: with `WaitForFirstConsumer` binding they stay
    /// pending until a pod mounts them.
    pub async fn acquire_pvc(&mut self, manifest: PvcManifest) -> Result<ResourceRef> {
        self.create(ClusterObject::PersistentVolumeClaim(manifest.0))
            .await
    }

    /// Create a StatefulSet and wait until all its replicas are ready
    pub async fn acquire_stateful_set(&mut self, manifest: StatefulSetManifest) -> Result<Workload> {
        let resource = self.create(ClusterObject::StatefulSet(manifest.0)).await?;

        let ops = self.ops.clone();
        let description = format!("StatefulSet {} to become ready", resource.name);
        let ready = wait_for_resource(
            &description,
            self.config.ready_timeout,
            self.config.poll_interval,
            || {
                let ops = ops.clone();
                let resource = resource.clone();
                async move {
                    let sts = ops
                        .get_stateful_set(&resource.namespace, &resource.name)
                        .await?;
                    Ok(is_ready(&sts).then_some(sts))
                }
            },
        )
        .await;

        match ready {
            Ok(stateful_set) => {
                let replicas = stateful_set
                    .spec
                    .as_ref()
                    .and_then(|s| s.replicas)
                    .unwrap_or(1);
                info!(
                    owner = %self.owner,
                    name = %resource.name,
                    replicas = replicas,
                    "StatefulSet ready"
                );
                Ok(Workload {
                    name: resource.name,
                    namespace: resource.namespace,
                    replicas,
                    stateful_set,
                })
            }
            Err(e) => {
                self.unwind().await;
                Err(Error::acquisition(
                    ResourceKind::StatefulSet.as_str(),
                    resource.name,
                    e.to_string(),
                ))
            }
        }
    }

    /// Reuse the secret `name` if it exists, otherwise create it from `manifest`.
    ///
    /// A reused secret is not owned by the scope and survives release.
    pub async fn acquire_secret(
        &mut self,
        name: &str,
        manifest: Option<SecretManifest>,
    ) -> Result<ResourceRef> {
        let namespace = self.config.namespace.clone();
        let existing = match self.ops.get_secret(&namespace, name).await {
            Ok(existing) => existing,
            Err(e) => {
                self.unwind().await;
                return Err(Error::acquisition(
                    ResourceKind::Secret.as_str(),
                    name,
                    e.to_string(),
                ));
            }
        };
        if existing.is_some() {
            debug!(owner = %self.owner, name = %name, "Reusing existing secret");
            return Ok(ResourceRef::new(ResourceKind::Secret, namespace, name));
        }

        match manifest {
            Some(manifest) if manifest.name() == name => {
                self.create(ClusterObject::Secret(manifest.0)).await
            }
            Some(manifest) => {
                self.unwind().await;
                Err(Error::validation_for(
                    format!("Secret {:?}", manifest.name()),
                    format!("manifest does not describe secret {:?}", name),
                ))
            }
            None => {
                self.unwind().await;
                Err(Error::acquisition(
                    ResourceKind::Secret.as_str(),
                    name,
                    "registry credentials not found",
                ))
            }
        }
    }

    /// Delete every owned object in reverse creation order.
    ///
    /// Returns the objects that could not be deleted; each was already logged.
    pub async fn release(mut self) -> Vec<ResourceRef> {
        teardown(&*self.ops, &self.config, &self.owner, &mut self.created).await
    }

    async fn create(&mut self, mut object: ClusterObject) -> Result<ResourceRef> {
        let resource = ResourceRef::new(
            object.kind(),
            self.config.namespace.clone(),
            object.name(),
        );
        object.set_namespace(&resource.namespace);

        debug!(owner = %self.owner, kind = %resource.kind, name = %resource.name, "Creating object");
        // Recorded before the call so a cancelled request is still cleaned up
        self.created.push(resource.clone());
        match self.ops.create(&resource.namespace, &object).await {
            Ok(()) => Ok(resource),
            Err(e) => {
                self.created.pop();
                self.unwind().await;
                Err(Error::acquisition(
                    resource.kind.as_str(),
                    resource.name,
                    e.to_string(),
                ))
            }
        }
    }

    async fn unwind(&mut self) {
        if !self.created.is_empty() {
            debug!(owner = %self.owner, count = self.created.len(), "Acquisition failed, deleting partial state");
            teardown(&*self.ops, &self.config, &self.owner, &mut self.created).await;
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if self.created.is_empty() {
            return;
        }
        let mut resources = std::mem::take(&mut self.created);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    owner = %self.owner,
                    count = resources.len(),
                    "Scope dropped without release, cleaning up in background"
                );
                let ops = self.ops.clone();
                let config = self.config.clone();
                let owner = std::mem::take(&mut self.owner);
                self.cleanups.spawn_on(
                    async move {
                        teardown(&*ops, &config, &owner, &mut resources).await;
                    },
                    &handle,
                );
            }
            Err(_) => {
                for resource in &resources {
                    error!(owner = %self.owner, resource = %resource, "No runtime left for cleanup, object leaked");
                }
            }
        }
    }
}

/// Pop and delete objects until `resources` is empty.
///
/// The object being deleted stays in `resources` until its deletion finished,
/// so a cancelled teardown leaves it for the next one.
async fn teardown(
    ops: &dyn ClusterOps,
    config: &SpawnerConfig,
    owner: &str,
    resources: &mut Vec<ResourceRef>,
) -> Vec<ResourceRef> {
    let mut leaked = Vec::new();
    while let Some(resource) = resources.last().cloned() {
        if let Err(e) = delete_resource(ops, config, &resource).await {
            let warning = Error::cleanup(resource.kind.as_str(), resource.name.clone(), e.to_string());
            warn!(
                owner = %owner,
                kind = %resource.kind,
                name = %resource.name,
                error = %warning,
                "Cleanup failed, object leaked"
            );
            leaked.push(resource);
        } else {
            debug!(owner = %owner, kind = %resource.kind, name = %resource.name, "Deleted object");
        }
        resources.pop();
    }
    leaked
}

async fn delete_resource(
    ops: &dyn ClusterOps,
    config: &SpawnerConfig,
    resource: &ResourceRef,
) -> Result<()> {
    delete_with_retry(ops, config, resource).await?;

    // Claims created from volume claim templates carry the selector labels
    // of their StatefulSet and are not deleted with it.
    if resource.kind == ResourceKind::StatefulSet {
        let selector = format!("{}={}", APP_LABEL, resource.name);
        let claims = retry_with_backoff(
            &config.cleanup_retry,
            &format!("list claims of {}", resource),
            |e: &Error| e.is_retryable(),
            || ops.list_pvc_names(&resource.namespace, &selector),
        )
        .await?;
        for claim in claims {
            let claim = ResourceRef::new(
                ResourceKind::PersistentVolumeClaim,
                resource.namespace.clone(),
                claim,
            );
            delete_with_retry(ops, config, &claim).await?;
        }
    }
    Ok(())
}

async fn delete_with_retry(
    ops: &dyn ClusterOps,
    config: &SpawnerConfig,
    resource: &ResourceRef,
) -> Result<()> {
    retry_with_backoff(
        &config.cleanup_retry,
        &format!("delete {}", resource),
        |e: &Error| e.is_retryable(),
        || ops.delete(resource),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::testing::{ClusterEvent, RecordingCluster};
    use super::*;
    use crate::manifest::{self, StatefulSetBuilder};
    use proptest::prelude::*;

    fn test_config() -> SpawnerConfig {
        SpawnerConfig {
            namespace: "checks".to_string(),
            ready_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            cleanup_retry: RetryConfig::immediate(3),
        }
    }

    fn spawner(cluster: &Arc<RecordingCluster>) -> Spawner {
        Spawner::new(cluster.clone(), test_config())
    }

    fn composite_manifests(
        name: &str,
    ) -> (ServiceManifest, PvcManifest, StatefulSetManifest) {
        let svc = manifest::service(name, &[(80, "http")]).unwrap();
        let pvc = manifest::persistent_volume_claim(&format!("{}-data", name), "1Gi", None).unwrap();
        let sts = StatefulSetBuilder::new(name, "tools:1.0")
            .service(&svc)
            .mount("/mnt", manifest::persistent_volume_claim("mnt", "1Gi", None).unwrap())
            .build()
            .unwrap();
        (svc, pvc, sts)
    }

    // ==========================================================================
    // Story Tests: Guaranteed Cleanup
    // ==========================================================================

    /// Story: A check creates a service, a claim and a workload, then releases them
    ///
    /// Everything is deleted exactly once, newest first.
    #[tokio::test]
    async fn story_release_deletes_in_reverse_creation_order() {
        let cluster = Arc::new(RecordingCluster::new());
        let spawner = spawner(&cluster);
        let (svc, pvc, sts) = composite_manifests("bench");

        let mut scope = spawner.scope("Requesting PVC");
        scope.acquire_service(svc).await.unwrap();
        scope.acquire_pvc(pvc).await.unwrap();
        let workload = scope.acquire_stateful_set(sts).await.unwrap();
        assert_eq!(workload.pod_names(), vec!["bench-0"]);
        assert_eq!(scope.resources().len(), 3);

        let leaked = scope.release().await;
        assert!(leaked.is_empty());

        assert_eq!(
            cluster.deletions(),
            vec![
                (ResourceKind::StatefulSet, "bench".to_string()),
                (ResourceKind::PersistentVolumeClaim, "mnt-bench-0".to_string()),
                (ResourceKind::PersistentVolumeClaim, "bench-data".to_string()),
                (ResourceKind::Service, "bench".to_string()),
            ]
        );
        assert!(cluster.is_empty());
    }

    /// Story: The third object of a composite fails to create
    ///
    /// The first two are deleted before the error reaches the check.
    #[tokio::test]
    async fn story_failed_acquisition_unwinds_the_scope() {
        let cluster = Arc::new(RecordingCluster::new().fail_create_of("bench"));
        let spawner = spawner(&cluster);
        let svc = manifest::service("svc", &[(80, "http")]).unwrap();
        let pvc = manifest::persistent_volume_claim("data", "1Gi", None).unwrap();
        let sts = StatefulSetBuilder::new("bench", "tools:1.0").build().unwrap();

        let mut scope = spawner.scope("composite");
        scope.acquire_service(svc).await.unwrap();
        scope.acquire_pvc(pvc).await.unwrap();
        let err = scope.acquire_stateful_set(sts).await.unwrap_err();

        assert!(matches!(err, Error::Acquisition { .. }));
        assert!(scope.resources().is_empty());
        assert_eq!(
            cluster.deletions(),
            vec![
                (ResourceKind::PersistentVolumeClaim, "data".to_string()),
                (ResourceKind::Service, "svc".to_string()),
            ]
        );
        assert!(cluster.is_empty());
    }

    /// Story: A workload never becomes ready within the timeout
    #[tokio::test]
    async fn story_readiness_timeout_is_an_acquisition_failure() {
        let cluster = Arc::new(RecordingCluster::new().never_ready());
        let spawner = spawner(&cluster);
        let sts = StatefulSetBuilder::new("backup-tools", "registry/backup-tools:1.2.0")
            .build()
            .unwrap();

        let mut scope = spawner.scope("Registry access");
        let err = scope.acquire_stateful_set(sts).await.unwrap_err();

        match err {
            Error::Acquisition { kind, name, message } => {
                assert_eq!(kind, "StatefulSet");
                assert_eq!(name, "backup-tools");
                assert!(message.contains("timed out"));
            }
            other => panic!("expected acquisition error, got {:?}", other),
        }
        assert!(cluster.is_empty());
    }

    /// Story: The check holding a scope is aborted mid-flight
    ///
    /// The dropped scope cleans up in the background and the spawner can
    /// wait for that cleanup before the process exits.
    #[tokio::test]
    async fn story_dropped_scope_cleans_up_in_background() {
        let cluster = Arc::new(RecordingCluster::new());
        let spawner = spawner(&cluster);
        let (svc, _, sts) = composite_manifests("aborted");

        {
            let mut scope = spawner.scope("aborted check");
            scope.acquire_service(svc).await.unwrap();
            scope.acquire_stateful_set(sts).await.unwrap();
        }

        spawner.wait_for_cleanup().await;
        assert!(cluster.is_empty());
        assert_eq!(cluster.deletions().len(), 3);
        assert_eq!(spawner.pending_cleanups(), 0);
    }

    /// Story: An aborted task drops its scope while waiting for readiness
    #[tokio::test]
    async fn story_abort_during_readiness_wait_still_cleans_up() {
        let cluster = Arc::new(RecordingCluster::new().never_ready());
        let spawner = Arc::new(Spawner::new(
            cluster.clone(),
            SpawnerConfig {
                ready_timeout: Duration::from_secs(60),
                ..test_config()
            },
        ));

        let task = {
            let spawner = spawner.clone();
            tokio::spawn(async move {
                let sts = StatefulSetBuilder::new("slow", "tools:1.0").build().unwrap();
                let mut scope = spawner.scope("slow check");
                let _ = scope.acquire_stateful_set(sts).await;
            })
        };

        // Let the task create the StatefulSet before aborting it
        while !cluster
            .events()
            .iter()
            .any(|e| matches!(e, ClusterEvent::Created(ResourceKind::StatefulSet, _)))
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        task.abort();
        let _ = task.await;

        spawner.wait_for_cleanup().await;
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_reported_not_raised() {
        let cluster = Arc::new(RecordingCluster::new().fail_delete_of("stuck"));
        let spawner = spawner(&cluster);
        let svc = manifest::service("stuck", &[(80, "http")]).unwrap();

        let mut scope = spawner.scope("check");
        scope.acquire_service(svc).await.unwrap();
        let leaked = scope.release().await;

        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].name, "stuck");
        // Bounded retry: three attempts, then give up
        assert_eq!(cluster.delete_attempts("stuck"), 3);
    }

    #[tokio::test]
    async fn test_existing_secret_is_reused_and_kept() {
        let cluster = Arc::new(RecordingCluster::new().with_existing_secret("piwik-pro-registry"));
        let spawner = spawner(&cluster);

        let mut scope = spawner.scope("registry secret");
        let secret = scope.acquire_secret("piwik-pro-registry", None).await.unwrap();
        assert_eq!(secret.name, "piwik-pro-registry");
        assert!(scope.resources().is_empty());
        scope.release().await;

        assert!(cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_without_credentials_fails() {
        let cluster = Arc::new(RecordingCluster::new());
        let spawner = spawner(&cluster);

        let mut scope = spawner.scope("registry secret");
        let err = scope.acquire_secret("piwik-pro-registry", None).await.unwrap_err();
        assert!(err.to_string().contains("registry credentials not found"));
    }

    #[tokio::test]
    async fn test_created_secret_is_deleted_on_release() {
        let cluster = Arc::new(RecordingCluster::new());
        let spawner = spawner(&cluster);
        let manifest = manifest::registry_secret("piwik-pro-registry", b"{}".to_vec()).unwrap();

        let mut scope = spawner.scope("registry secret");
        scope
            .acquire_secret("piwik-pro-registry", Some(manifest))
            .await
            .unwrap();
        scope.release().await;

        assert_eq!(
            cluster.deletions(),
            vec![(ResourceKind::Secret, "piwik-pro-registry".to_string())]
        );
    }

    #[tokio::test]
    async fn test_create_error_from_api_is_wrapped() {
        let mut ops = MockClusterOps::new();
        ops.expect_create().returning(|_, _| {
            Err(Error::from(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "exceeded quota".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            })))
        });
        ops.expect_delete().never();

        let spawner = Spawner::new(Arc::new(ops), test_config());
        let mut scope = spawner.scope("quota");
        let pvc = manifest::persistent_volume_claim("big", "1Ti", None).unwrap();
        let err = scope.acquire_pvc(pvc).await.unwrap_err();

        assert!(err.to_string().contains("PersistentVolumeClaim big"));
        assert!(err.to_string().contains("exceeded quota"));
    }

    #[tokio::test]
    async fn test_objects_are_created_in_configured_namespace() {
        let mut ops = MockClusterOps::new();
        ops.expect_create()
            .withf(|namespace, object| {
                namespace == "checks"
                    && object.name() == "svc"
                    && object.kind() == ResourceKind::Service
            })
            .times(1)
            .returning(|_, _| Ok(()));
        ops.expect_delete()
            .withf(|r| r.namespace == "checks" && r.name == "svc")
            .times(1)
            .returning(|_| Ok(()));

        let spawner = Spawner::new(Arc::new(ops), test_config());
        let mut scope = spawner.scope("check");
        scope
            .acquire_service(manifest::service("svc", &[(80, "http")]).unwrap())
            .await
            .unwrap();
        assert!(scope.release().await.is_empty());
    }

    // ==========================================================================
    // Properties: Cleanup Order
    // ==========================================================================

    /// Objects a check acquires in order; `true` marks a create the cluster rejects
    fn acquisition_plan() -> impl Strategy<Value = Vec<(ResourceKind, bool)>> {
        let kind = prop_oneof![
            Just(ResourceKind::Service),
            Just(ResourceKind::PersistentVolumeClaim),
        ];
        prop::collection::vec((kind, prop::bool::weighted(0.2)), 1..8)
    }

    /// Acquire the plan like a check would, stopping at the first failure
    async fn acquire_all(spawner: &Spawner, plan: &[(ResourceKind, bool)]) -> bool {
        let mut scope = spawner.scope("generated");
        for (i, (kind, _)) in plan.iter().enumerate() {
            let name = format!("obj-{}", i);
            let acquired = match kind {
                ResourceKind::Service => {
                    scope
                        .acquire_service(manifest::service(&name, &[(80, "http")]).unwrap())
                        .await
                }
                _ => {
                    scope
                        .acquire_pvc(manifest::persistent_volume_claim(&name, "1Gi", None).unwrap())
                        .await
                }
            };
            if acquired.is_err() {
                assert!(scope.resources().is_empty());
                return false;
            }
        }
        assert!(scope.release().await.is_empty());
        true
    }

    proptest! {
        #[test]
        fn deletions_mirror_creations(plan in acquisition_plan()) {
            let mut cluster = RecordingCluster::new();
            for (i, (_, rejected)) in plan.iter().enumerate() {
                if *rejected {
                    cluster = cluster.fail_create_of(&format!("obj-{}", i));
                }
            }
            let cluster = Arc::new(cluster);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let completed = runtime.block_on(acquire_all(&spawner(&cluster), &plan));

            let mut expected = cluster.creations();
            expected.reverse();
            prop_assert_eq!(cluster.deletions(), expected);
            prop_assert!(cluster.is_empty());
            prop_assert_eq!(completed, plan.iter().all(|(_, rejected)| !rejected));
        }
    }
}
