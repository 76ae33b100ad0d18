//! Cluster operations used by the spawner
//!
//! Provides a trait-based abstraction over the handful of API calls the
//! spawner makes, allowing tests to mock or record cluster interactions while
//! production code uses the real kube client.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::manifest::ResourceKind;
use compliance_common::Error;

/// A namespaced object ready to be created
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterObject {
    /// apps/v1 StatefulSet
    StatefulSet(StatefulSet),
    /// v1 Service
    Service(Service),
    /// v1 PersistentVolumeClaim
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// v1 Secret
    Secret(Secret),
}

impl ClusterObject {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::Service(_) => ResourceKind::Service,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Secret(_) => ResourceKind::Secret,
        }
    }

    /// Name of the wrapped object
    pub fn name(&self) -> &str {
        let name = match self {
            Self::StatefulSet(o) => &o.metadata.name,
            Self::Service(o) => &o.metadata.name,
            Self::PersistentVolumeClaim(o) => &o.metadata.name,
            Self::Secret(o) => &o.metadata.name,
        };
        name.as_deref().unwrap_or_default()
    }

    pub(crate) fn set_namespace(&mut self, namespace: &str) {
        let meta = match self {
            Self::StatefulSet(o) => &mut o.metadata,
            Self::Service(o) => &mut o.metadata,
            Self::PersistentVolumeClaim(o) => &mut o.metadata,
            Self::Secret(o) => &mut o.metadata,
        };
        meta.namespace = Some(namespace.to_string());
    }
}

/// Identity of an object created in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Object kind
    pub kind: ResourceKind,
    /// Namespace the object lives in
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Reference to `kind/name` in `namespace`
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Trait abstracting the cluster calls of the spawner
///
/// Every call is atomic from the caller's perspective: it either happened or
/// it returned an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create an object in `namespace`
    async fn create(&self, namespace: &str, object: &ClusterObject) -> Result<(), Error>;

    /// Delete an object. Deleting an object that does not exist succeeds.
    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error>;

    /// Read a StatefulSet including its status
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, Error>;

    /// Read a Secret, `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Names of PVCs matching a label selector
    async fn list_pvc_names(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, Error>;
}

/// Production implementation backed by a kube client
#[derive(Clone)]
pub struct KubeClusterOps {
    client: Client,
}

impl KubeClusterOps {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn delete_named<K>(api: Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(name = %name, "Object already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn create(&self, namespace: &str, object: &ClusterObject) -> Result<(), Error> {
        let pp = PostParams::default();
        match object {
            ClusterObject::StatefulSet(o) => {
                self.api::<StatefulSet>(namespace).create(&pp, o).await?;
            }
            ClusterObject::Service(o) => {
                self.api::<Service>(namespace).create(&pp, o).await?;
            }
            ClusterObject::PersistentVolumeClaim(o) => {
                self.api::<PersistentVolumeClaim>(namespace).create(&pp, o).await?;
            }
            ClusterObject::Secret(o) => {
                self.api::<Secret>(namespace).create(&pp, o).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error> {
        let ns = resource.namespace.as_str();
        let name = resource.name.as_str();
        match resource.kind {
            ResourceKind::StatefulSet => delete_named(self.api::<StatefulSet>(ns), name).await,
            ResourceKind::Service => delete_named(self.api::<Service>(ns), name).await,
            ResourceKind::PersistentVolumeClaim => {
                delete_named(self.api::<PersistentVolumeClaim>(ns), name).await
            }
            ResourceKind::Secret => delete_named(self.api::<Secret>(ns), name).await,
        }
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, Error> {
        Ok(self.api::<StatefulSet>(namespace).get(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn list_pvc_names(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, Error> {
        let list = self
            .api::<PersistentVolumeClaim>(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items.into_iter().filter_map(|p| p.metadata.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest;

    #[test]
    fn test_cluster_object_identity() {
        let pvc = manifest::persistent_volume_claim("mnt", "1Gi", None).unwrap();
        let mut object = ClusterObject::PersistentVolumeClaim(pvc.0);
        assert_eq!(object.kind(), ResourceKind::PersistentVolumeClaim);
        assert_eq!(object.name(), "mnt");

        object.set_namespace("checks");
        match &object {
            ClusterObject::PersistentVolumeClaim(o) => {
                assert_eq!(o.metadata.namespace.as_deref(), Some("checks"))
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_resource_ref_display() {
        let r = ResourceRef::new(ResourceKind::Service, "default", "bench");
        assert_eq!(r.to_string(), "Service default/bench");
    }
}
