//! In-memory cluster recording every call, for spawner and engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::Secret;

use super::{ClusterObject, ClusterOps, ResourceRef};
use crate::manifest::ResourceKind;
use compliance_common::{Error, APP_LABEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Created(ResourceKind, String),
    Deleted(ResourceKind, String),
}

struct Stored {
    kind: ResourceKind,
    name: String,
    app: Option<String>,
    object: Option<ClusterObject>,
}

#[derive(Default)]
struct State {
    objects: Vec<Stored>,
    events: Vec<ClusterEvent>,
    delete_attempts: HashMap<String, u32>,
}

#[derive(Default)]
pub struct RecordingCluster {
    state: Mutex<State>,
    fail_create: HashSet<String>,
    fail_delete: HashSet<String>,
    never_ready: bool,
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create_of(mut self, name: &str) -> Self {
        self.fail_create.insert(name.to_string());
        self
    }

    pub fn fail_delete_of(mut self, name: &str) -> Self {
        self.fail_delete.insert(name.to_string());
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// A secret that exists before the run and is not created by it
    pub fn with_existing_secret(self, name: &str) -> Self {
        self.lock().objects.push(Stored {
            kind: ResourceKind::Secret,
            name: name.to_string(),
            app: None,
            object: None,
        });
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.lock().events.clone()
    }

    pub fn deletions(&self) -> Vec<(ResourceKind, String)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::Deleted(kind, name) => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn creations(&self) -> Vec<(ResourceKind, String)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::Created(kind, name) => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn delete_attempts(&self, name: &str) -> u32 {
        self.lock().delete_attempts.get(name).copied().unwrap_or(0)
    }

    /// True when nothing created during the test is left. Pre-existing secrets do not count.
    pub fn is_empty(&self) -> bool {
        self.lock().objects.iter().all(|o| o.object.is_none())
    }
}

#[async_trait]
impl ClusterOps for RecordingCluster {
    async fn create(&self, _namespace: &str, object: &ClusterObject) -> Result<(), Error> {
        let name = object.name().to_string();
        if self.fail_create.contains(&name) {
            return Err(Error::internal_with_context("create", "injected create failure"));
        }
        let mut state = self.lock();
        if state.objects.iter().any(|o| o.kind == object.kind() && o.name == name) {
            return Err(Error::internal_with_context("create", "already exists"));
        }

        // The StatefulSet controller creates one claim per template and replica
        if let ClusterObject::StatefulSet(sts) = object {
            let spec = sts.spec.as_ref();
            let replicas = spec.and_then(|s| s.replicas).unwrap_or(1);
            let templates = spec
                .and_then(|s| s.volume_claim_templates.clone())
                .unwrap_or_default();
            for template in templates {
                let template_name = template.metadata.name.unwrap_or_default();
                for i in 0..replicas {
                    state.objects.push(Stored {
                        kind: ResourceKind::PersistentVolumeClaim,
                        name: format!("{}-{}-{}", template_name, name, i),
                        app: Some(name.clone()),
                        object: Some(ClusterObject::PersistentVolumeClaim(Default::default())),
                    });
                }
            }
        }

        let app = match object {
            ClusterObject::StatefulSet(o) => o.metadata.labels.as_ref(),
            ClusterObject::Service(o) => o.metadata.labels.as_ref(),
            ClusterObject::PersistentVolumeClaim(o) => o.metadata.labels.as_ref(),
            ClusterObject::Secret(o) => o.metadata.labels.as_ref(),
        }
        .and_then(|labels| labels.get(APP_LABEL).cloned());

        state.objects.push(Stored {
            kind: object.kind(),
            name: name.clone(),
            app,
            object: Some(object.clone()),
        });
        state.events.push(ClusterEvent::Created(object.kind(), name));
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error> {
        let mut state = self.lock();
        *state
            .delete_attempts
            .entry(resource.name.clone())
            .or_default() += 1;
        if self.fail_delete.contains(&resource.name) {
            return Err(Error::internal_with_context("delete", "injected delete failure"));
        }
        state
            .objects
            .retain(|o| !(o.kind == resource.kind && o.name == resource.name));
        state
            .events
            .push(ClusterEvent::Deleted(resource.kind, resource.name.clone()));
        Ok(())
    }

    async fn get_stateful_set(&self, _namespace: &str, name: &str) -> Result<StatefulSet, Error> {
        let state = self.lock();
        let stored = state
            .objects
            .iter()
            .find(|o| o.kind == ResourceKind::StatefulSet && o.name == name)
            .and_then(|o| o.object.clone());
        let mut sts = match stored {
            Some(ClusterObject::StatefulSet(sts)) => sts,
            _ => return Err(Error::internal_with_context("get", "not found")),
        };
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        sts.status = Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(if self.never_ready { 0 } else { replicas }),
            ..Default::default()
        });
        Ok(sts)
    }

    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let exists = self
            .lock()
            .objects
            .iter()
            .any(|o| o.kind == ResourceKind::Secret && o.name == name);
        Ok(exists.then(Secret::default))
    }

    async fn list_pvc_names(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, Error> {
        let app = label_selector
            .strip_prefix(&format!("{}=", APP_LABEL))
            .unwrap_or_default();
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|o| o.kind == ResourceKind::PersistentVolumeClaim && o.app.as_deref() == Some(app))
            .map(|o| o.name.clone())
            .collect())
    }
}
