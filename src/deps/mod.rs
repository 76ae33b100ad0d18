//! Dependency resolver
//!
//! A run-scoped registry of named, lazily constructed values. Each key is
//! constructed at most once per run: concurrent first requests share one
//! factory invocation through a per-key `OnceCell`, and failures are
//! memoized as well so a broken factory is not retried by every check.
//!
//! Keys are either cheap (known from configuration, usable by skip
//! predicates) or expensive (touch the cluster). Skip evaluation goes
//! through [`Resolver::resolve_cheap`], which refuses expensive keys.

mod factories;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{MaintenanceType, MonthlyTraffic, Phase};
use crate::requirements::HardwareRequirements;
use crate::spawner::{ResourceRef, ResourceScope, Spawner, Workload};
use compliance_common::{Error, Result};

pub use factories::{standard_resolver, REGISTRY_SECRET_NAME};

/// Name of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKey {
    /// Installation has no internet access
    Offline,
    /// Traffic tier
    MonthlyTraffic,
    /// Maintenance model
    MaintenanceType,
    /// Run phase
    Phase,
    /// Hardware requirements of the traffic tier
    Requirements,
    /// Extra allowed namespaces
    NamespaceWhitelist,
    /// Storage class for spawned volumes, empty for the cluster default
    StorageClass,
    /// Image registry host
    RegistryServer,
    /// Tools image reference
    ToolsImage,
    /// Namespace of spawned workloads
    Namespace,
    /// Verified kube client
    KubeClient,
    /// Resource spawner
    Spawner,
    /// Image pull secret for the registry
    RegistrySecret,
    /// One tools pod
    SinglePod,
    /// One tools pod per node
    PodOnEachNode,
    /// One tools pod with a PVC per node
    PodWithVolumeOnEachNode,
    /// Keys registered by embedders and tests
    Custom(&'static str),
}

impl DependencyKey {
    /// Stable identifier used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::MonthlyTraffic => "monthly_traffic",
            Self::MaintenanceType => "maintenance_type",
            Self::Phase => "phase",
            Self::Requirements => "requirements",
            Self::NamespaceWhitelist => "namespace_whitelist",
            Self::StorageClass => "storage_class",
            Self::RegistryServer => "registry_server",
            Self::ToolsImage => "tools_image",
            Self::Namespace => "namespace",
            Self::KubeClient => "kubernetes_client",
            Self::Spawner => "spawner",
            Self::RegistrySecret => "registry_secret",
            Self::SinglePod => "single_pod",
            Self::PodOnEachNode => "pod_on_each_node",
            Self::PodWithVolumeOnEachNode => "pod_with_volume_on_each_node",
            Self::Custom(name) => *name,
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved value
#[derive(Clone)]
pub enum Dependency {
    /// Boolean flag
    Flag(bool),
    /// Text value
    Text(String),
    /// List of strings
    List(Vec<String>),
    /// Traffic tier
    MonthlyTraffic(MonthlyTraffic),
    /// Maintenance model
    MaintenanceType(MaintenanceType),
    /// Run phase
    Phase(Phase),
    /// Requirement table
    Requirements(Arc<HardwareRequirements>),
    /// Kube client (internally reference counted)
    Client(kube::Client),
    /// Shared spawner
    Spawner(Arc<Spawner>),
    /// Secret reference
    Secret(Arc<ResourceRef>),
    /// Ready workload
    Workload(Arc<Workload>),
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(v) => write!(f, "Flag({})", v),
            Self::Text(v) => write!(f, "Text({:?})", v),
            Self::List(v) => write!(f, "List({:?})", v),
            Self::MonthlyTraffic(v) => write!(f, "MonthlyTraffic({:?})", v),
            Self::MaintenanceType(v) => write!(f, "MaintenanceType({:?})", v),
            Self::Phase(v) => write!(f, "Phase({:?})", v),
            Self::Requirements(_) => f.write_str("Requirements"),
            Self::Client(_) => f.write_str("Client"),
            Self::Spawner(_) => f.write_str("Spawner"),
            Self::Secret(r) => write!(f, "Secret({})", r),
            Self::Workload(w) => write!(f, "Workload({})", w.name),
        }
    }
}

/// Whether a key may be resolved during skip evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cost {
    /// Known without touching the cluster
    Cheap,
    /// Touches the cluster or creates resources
    Expensive,
}

/// Future returned by a factory
pub type FactoryFuture<'a> = BoxFuture<'a, Result<Dependency>>;

/// Builds a dependency, resolving what it needs through the resolver
pub type Factory = Arc<dyn for<'a> Fn(&'a Resolver) -> FactoryFuture<'a> + Send + Sync>;

struct Registration {
    cost: Cost,
    foundational: bool,
    factory: Factory,
}

/// Run-scoped registry of dependency factories with memoized results
#[derive(Default)]
pub struct Resolver {
    registrations: HashMap<DependencyKey, Registration>,
    cache: DashMap<DependencyKey, Arc<OnceCell<std::result::Result<Dependency, String>>>>,
    scopes: Mutex<Vec<ResourceScope>>,
}

impl Resolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value known up front. Values are cheap.
    pub fn register_value(&mut self, key: DependencyKey, value: Dependency) {
        self.register_factory(key, Cost::Cheap, move |_| {
            let value = value.clone();
            async move { Ok(value) }.boxed()
        });
    }

    /// Register a factory
    pub fn register_factory<F>(&mut self, key: DependencyKey, cost: Cost, factory: F)
    where
        F: for<'a> Fn(&'a Resolver) -> FactoryFuture<'a> + Send + Sync + 'static,
    {
        self.registrations.insert(
            key,
            Registration {
                cost,
                foundational: false,
                factory: Arc::new(factory),
            },
        );
    }

    /// Register a factory whose failure aborts the run
    pub fn register_foundational<F>(&mut self, key: DependencyKey, factory: F)
    where
        F: for<'a> Fn(&'a Resolver) -> FactoryFuture<'a> + Send + Sync + 'static,
    {
        self.registrations.insert(
            key,
            Registration {
                cost: Cost::Expensive,
                foundational: true,
                factory: Arc::new(factory),
            },
        );
    }

    /// Whether a provider for `key` is registered
    pub fn provides(&self, key: DependencyKey) -> bool {
        self.registrations.contains_key(&key)
    }

    /// Cost of `key`, `None` when it is not registered
    pub fn cost(&self, key: DependencyKey) -> Option<Cost> {
        self.registrations.get(&key).map(|r| r.cost)
    }

    /// Resolve one key, constructing it on first request.
    ///
    /// Factories must not depend on themselves, directly or indirectly.
    pub fn resolve(&self, key: DependencyKey) -> BoxFuture<'_, Result<Dependency>> {
        async move {
            let registration = self.registrations.get(&key).ok_or_else(|| {
                Error::dependency(key.as_str(), "no provider registered")
            })?;

            let cell = self.cache.entry(key).or_default().clone();
            let outcome = cell
                .get_or_init(|| async {
                    debug!(dependency = %key, "Constructing dependency");
                    match (registration.factory)(self).await {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            warn!(dependency = %key, error = %e, "Dependency construction failed");
                            Err(e.to_string())
                        }
                    }
                })
                .await;

            outcome.clone().map_err(|message| {
                if registration.foundational {
                    Error::foundational_dependency(key.as_str(), message)
                } else {
                    Error::dependency(key.as_str(), message)
                }
            })
        }
        .boxed()
    }

    /// Resolve cheap keys for skip evaluation; expensive keys are rejected.
    pub async fn resolve_cheap(&self, keys: &[DependencyKey]) -> Result<ResolvedDeps> {
        let mut values = HashMap::new();
        for &key in keys {
            if self.cost(key) == Some(Cost::Expensive) {
                return Err(Error::dependency(
                    key.as_str(),
                    "skip conditions may only use cheap dependencies",
                ));
            }
            values.insert(key, self.resolve(key).await?);
        }
        Ok(ResolvedDeps { values })
    }

    /// Resolve a set of keys concurrently.
    ///
    /// Returns the resolved values and, separately, every key that failed.
    pub async fn resolve_all(
        &self,
        keys: &BTreeSet<DependencyKey>,
    ) -> (ResolvedDeps, Vec<(DependencyKey, Error)>) {
        let results = join_all(
            keys.iter()
                .map(|&key| async move { (key, self.resolve(key).await) }),
        )
        .await;

        let mut values = HashMap::new();
        let mut failures = Vec::new();
        for (key, result) in results {
            match result {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) => failures.push((key, e)),
            }
        }
        (ResolvedDeps { values }, failures)
    }

    /// First foundational dependency that failed to construct, if any
    pub fn foundational_failure(&self) -> Option<Error> {
        self.registrations
            .iter()
            .filter(|(_, registration)| registration.foundational)
            .find_map(|(key, _)| {
                let cell = self.cache.get(key)?;
                match cell.value().get() {
                    Some(Err(message)) => {
                        Some(Error::foundational_dependency(key.as_str(), message.clone()))
                    }
                    _ => None,
                }
            })
    }

    /// Keep `scope` alive until [`Resolver::shutdown`]
    pub fn adopt(&self, scope: ResourceScope) {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.push(scope);
        }
        // A poisoned lock drops the scope here, which schedules its cleanup
    }

    /// Release adopted scopes, newest first, and wait for background cleanups.
    pub async fn shutdown(&self) {
        let scopes = match self.scopes.lock() {
            Ok(mut scopes) => std::mem::take(&mut *scopes),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for scope in scopes.into_iter().rev() {
            let owner = scope.owner().to_string();
            let leaked = scope.release().await;
            if !leaked.is_empty() {
                warn!(dependency = %owner, leaked = leaked.len(), "Dependency left objects behind");
            }
        }

        let spawner = self
            .cache
            .get(&DependencyKey::Spawner)
            .and_then(|cell| match cell.value().get() {
                Some(Ok(Dependency::Spawner(spawner))) => Some(spawner.clone()),
                _ => None,
            });
        if let Some(spawner) = spawner {
            spawner.wait_for_cleanup().await;
        }
    }
}

/// Values handed to a check or skip predicate, limited to the keys it declared
#[derive(Debug, Clone, Default)]
pub struct ResolvedDeps {
    values: HashMap<DependencyKey, Dependency>,
}

fn wrong_type(key: DependencyKey) -> Error {
    Error::internal_with_context("dependency", format!("{} has an unexpected type", key))
}

impl ResolvedDeps {
    /// Values from explicit pairs, for tests and embedders
    pub fn from_pairs(pairs: impl IntoIterator<Item = (DependencyKey, Dependency)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    /// Copy of the values for `keys` only
    pub fn subset<'a>(&self, keys: impl IntoIterator<Item = &'a DependencyKey>) -> Self {
        Self {
            values: keys
                .into_iter()
                .filter_map(|k| self.values.get(k).map(|v| (*k, v.clone())))
                .collect(),
        }
    }

    /// Raw value of `key`
    pub fn get(&self, key: DependencyKey) -> Result<&Dependency> {
        self.values.get(&key).ok_or_else(|| {
            Error::internal_with_context("dependency", format!("{} was not declared", key))
        })
    }

    /// Boolean value of `key`
    pub fn flag(&self, key: DependencyKey) -> Result<bool> {
        match self.get(key)? {
            Dependency::Flag(v) => Ok(*v),
            _ => Err(wrong_type(key)),
        }
    }

    /// Text value of `key`
    pub fn text(&self, key: DependencyKey) -> Result<&str> {
        match self.get(key)? {
            Dependency::Text(v) => Ok(v),
            _ => Err(wrong_type(key)),
        }
    }

    /// List value of `key`
    pub fn list(&self, key: DependencyKey) -> Result<&[String]> {
        match self.get(key)? {
            Dependency::List(v) => Ok(v),
            _ => Err(wrong_type(key)),
        }
    }

    /// Offline flag
    pub fn offline(&self) -> Result<bool> {
        self.flag(DependencyKey::Offline)
    }

    /// Traffic tier
    pub fn monthly_traffic(&self) -> Result<MonthlyTraffic> {
        match self.get(DependencyKey::MonthlyTraffic)? {
            Dependency::MonthlyTraffic(v) => Ok(*v),
            _ => Err(wrong_type(DependencyKey::MonthlyTraffic)),
        }
    }

    /// Maintenance model
    pub fn maintenance_type(&self) -> Result<MaintenanceType> {
        match self.get(DependencyKey::MaintenanceType)? {
            Dependency::MaintenanceType(v) => Ok(*v),
            _ => Err(wrong_type(DependencyKey::MaintenanceType)),
        }
    }

    /// Run phase
    pub fn phase(&self) -> Result<Phase> {
        match self.get(DependencyKey::Phase)? {
            Dependency::Phase(v) => Ok(*v),
            _ => Err(wrong_type(DependencyKey::Phase)),
        }
    }

    /// Hardware requirements
    pub fn requirements(&self) -> Result<&HardwareRequirements> {
        match self.get(DependencyKey::Requirements)? {
            Dependency::Requirements(v) => Ok(v),
            _ => Err(wrong_type(DependencyKey::Requirements)),
        }
    }

    /// Kube client
    pub fn client(&self) -> Result<&kube::Client> {
        match self.get(DependencyKey::KubeClient)? {
            Dependency::Client(v) => Ok(v),
            _ => Err(wrong_type(DependencyKey::KubeClient)),
        }
    }

    /// Spawner
    pub fn spawner(&self) -> Result<&Arc<Spawner>> {
        match self.get(DependencyKey::Spawner)? {
            Dependency::Spawner(v) => Ok(v),
            _ => Err(wrong_type(DependencyKey::Spawner)),
        }
    }

    /// Registry pull secret
    pub fn registry_secret(&self) -> Result<&ResourceRef> {
        match self.get(DependencyKey::RegistrySecret)? {
            Dependency::Secret(v) => Ok(v),
            _ => Err(wrong_type(DependencyKey::RegistrySecret)),
        }
    }

    /// Workload behind `key`
    pub fn workload(&self, key: DependencyKey) -> Result<&Workload> {
        match self.get(key)? {
            Dependency::Workload(v) => Ok(v),
            _ => Err(wrong_type(key)),
        }
    }
}
