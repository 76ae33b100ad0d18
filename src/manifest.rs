//! Manifest builder
//!
//! Pure constructors for the objects the spawner creates. Inputs are
//! validated here so a malformed manifest never reaches the API server.
//! Manifests are opaque: only the spawner reads the wrapped object.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service, ServicePort, ServiceSpec,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::json;

use compliance_common::kube_utils::parse_quantity;
use compliance_common::{Error, Result, APP_LABEL, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CHECKER};

/// Size of a PVC when none is given
pub const DEFAULT_PVC_SIZE: &str = "100Mi";

/// Command keeping tool pods alive until the spawner deletes them
const IDLE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Kinds of objects the spawner knows how to manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// apps/v1 StatefulSet
    StatefulSet,
    /// v1 Service
    Service,
    /// v1 PersistentVolumeClaim
    PersistentVolumeClaim,
    /// v1 Secret
    Secret,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatefulSet => "StatefulSet",
            Self::Service => "Service",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Secret => "Secret",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), name.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_CHECKER.to_string(),
        ),
    ])
}

/// Reject names the API server would reject (RFC 1123 label)
fn validate_name(kind: ResourceKind, name: &str) -> Result<()> {
    let resource = format!("{} {:?}", kind, name);
    if name.is_empty() {
        return Err(Error::validation_for_field(resource, "metadata.name", "name must not be empty"));
    }
    if name.len() > 63 {
        return Err(Error::validation_for_field(
            resource,
            "metadata.name",
            "name must be at most 63 characters",
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(Error::validation_for_field(
            resource,
            "metadata.name",
            "name must consist of lowercase alphanumerics and '-'",
        ));
    }
    Ok(())
}

fn validate_size(name: &str, size: &str) -> Result<()> {
    match parse_quantity(size) {
        Ok(bytes) if bytes > 0.0 => Ok(()),
        _ => Err(Error::validation_for_field(
            format!("PersistentVolumeClaim {:?}", name),
            "spec.resources.requests.storage",
            format!("{:?} is not a valid storage size", size),
        )),
    }
}

/// Headless Service selecting the pods of the StatefulSet with the same name
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceManifest(pub(crate) Service);

/// Standalone PVC, or a volume claim template of a StatefulSet
#[derive(Debug, Clone, PartialEq)]
pub struct PvcManifest(pub(crate) PersistentVolumeClaim);

/// StatefulSet running the tools image
#[derive(Debug, Clone, PartialEq)]
pub struct StatefulSetManifest(pub(crate) StatefulSet);

/// Image pull secret
#[derive(Debug, Clone, PartialEq)]
pub struct SecretManifest(pub(crate) Secret);

macro_rules! manifest_name {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                /// Object name
                pub fn name(&self) -> &str {
                    self.0.metadata.name.as_deref().unwrap_or_default()
                }
            }
        )*
    };
}

manifest_name!(ServiceManifest, PvcManifest, StatefulSetManifest, SecretManifest);

/// Build a headless Service exposing `ports` (port, name) of pods labelled `app=<name>`.
pub fn service(name: &str, ports: &[(i32, &str)]) -> Result<ServiceManifest> {
    validate_name(ResourceKind::Service, name)?;
    if ports.is_empty() {
        return Err(Error::validation_for_field(
            format!("Service {:?}", name),
            "spec.ports",
            "a service needs at least one port",
        ));
    }

    let ports = ports
        .iter()
        .map(|(port, port_name)| ServicePort {
            name: Some(port_name.to_string()),
            port: *port,
            ..Default::default()
        })
        .collect();

    Ok(ServiceManifest(Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Build a ReadWriteOnce PVC of `size` on `storage_class` (cluster default when `None`).
pub fn persistent_volume_claim(
    name: &str,
    size: &str,
    storage_class: Option<&str>,
) -> Result<PvcManifest> {
    validate_name(ResourceKind::PersistentVolumeClaim, name)?;
    validate_size(name, size)?;

    Ok(PvcManifest(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(name)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class.map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Build a `kubernetes.io/dockerconfigjson` secret from a docker config document.
pub fn registry_secret(name: &str, docker_config_json: Vec<u8>) -> Result<SecretManifest> {
    validate_name(ResourceKind::Secret, name)?;
    if docker_config_json.is_empty() {
        return Err(Error::validation_for_field(
            format!("Secret {:?}", name),
            "data",
            "docker config must not be empty",
        ));
    }

    Ok(SecretManifest(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(name)),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            ByteString(docker_config_json),
        )])),
        ..Default::default()
    }))
}

/// Builder for tool StatefulSets.
///
/// Pods of one StatefulSet repel each other on the hostname topology key, so
/// `replicas` equal to the node count yields one pod per node.
#[derive(Debug, Clone)]
pub struct StatefulSetBuilder {
    name: String,
    image: String,
    replicas: i32,
    service_name: Option<String>,
    mounts: Vec<(String, PvcManifest)>,
    pull_secrets: Vec<String>,
}

impl StatefulSetBuilder {
    /// StatefulSet `name` with one replica of `image`
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            replicas: 1,
            service_name: None,
            mounts: Vec::new(),
            pull_secrets: Vec::new(),
        }
    }

    /// Number of pods
    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Governing headless service
    pub fn service(mut self, service: &ServiceManifest) -> Self {
        self.service_name = Some(service.name().to_string());
        self
    }

    /// Mount a volume claim template at `path`
    pub fn mount(mut self, path: impl Into<String>, claim: PvcManifest) -> Self {
        self.mounts.push((path.into(), claim));
        self
    }

    /// Reference an image pull secret
    pub fn pull_secret(mut self, secret_name: impl Into<String>) -> Self {
        self.pull_secrets.push(secret_name.into());
        self
    }

    /// Validate and build the manifest
    pub fn build(self) -> Result<StatefulSetManifest> {
        validate_name(ResourceKind::StatefulSet, &self.name)?;
        let resource = format!("StatefulSet {:?}", self.name);
        if self.image.trim().is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "spec.template.spec.containers[0].image",
                "a container image is required",
            ));
        }
        if self.replicas < 0 {
            return Err(Error::validation_for_field(
                resource,
                "spec.replicas",
                "replicas must not be negative",
            ));
        }
        for (i, (path, _)) in self.mounts.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(Error::validation_for_field(
                    resource,
                    "volumeMounts.mountPath",
                    format!("mount path {:?} must be absolute", path),
                ));
            }
            if self.mounts[..i].iter().any(|(p, _)| p == path) {
                return Err(Error::validation_for_field(
                    resource,
                    "volumeMounts.mountPath",
                    format!("mount path {:?} used twice", path),
                ));
            }
        }

        let volume_mounts: Vec<_> = self
            .mounts
            .iter()
            .map(|(path, claim)| json!({ "name": claim.name(), "mountPath": path }))
            .collect();
        let claim_templates = self
            .mounts
            .iter()
            .map(|(_, claim)| serde_json::to_value(&claim.0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::serialization(e.to_string()))?;
        let pull_secrets: Vec<_> = self
            .pull_secrets
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        let labels = labels(&self.name);

        let manifest = json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": self.name, "labels": labels },
            "spec": {
                "replicas": self.replicas,
                "serviceName": self.service_name.unwrap_or_default(),
                "selector": { "matchLabels": { APP_LABEL: self.name } },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "affinity": {
                            "podAntiAffinity": {
                                "requiredDuringSchedulingIgnoredDuringExecution": [{
                                    "labelSelector": { "matchLabels": { APP_LABEL: self.name } },
                                    "topologyKey": "kubernetes.io/hostname"
                                }]
                            }
                        },
                        "securityContext": { "fsGroup": 1000 },
                        "imagePullSecrets": pull_secrets,
                        "containers": [{
                            "name": self.name,
                            "image": self.image,
                            "imagePullPolicy": "IfNotPresent",
                            "command": IDLE_COMMAND,
                            "resources": {
                                "limits": { "cpu": "100m", "memory": "512Mi" },
                                "requests": { "cpu": "100m", "memory": "512Mi" }
                            },
                            "volumeMounts": volume_mounts
                        }]
                    }
                },
                "volumeClaimTemplates": claim_templates
            }
        });

        serde_json::from_value(manifest)
            .map(StatefulSetManifest)
            .map_err(|e| Error::serialization(format!("invalid StatefulSet manifest: {}", e)))
    }
}
