//! Minimal models of the cluster objects the controller reads and writes
//!
//! Only the fields the reconciler actually touches are modelled. Every object
//! carries an [`ObjectMeta`] with an opaque `resource_version` used for
//! optimistic concurrency by the [`crate::store::ObjectStore`] seam.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Namespaced name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Link from an owned object back to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Metadata shared by every object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Opaque version assigned by the store; 0 for objects never stored
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Anything held by an [`crate::store::ObjectStore`]
pub trait Object: Clone + Send + Sync + 'static {
    /// Kind name used in errors and owner references
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    #[must_use]
    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    /// Copy fields owned by the server from the stored copy before an update
    fn carry_server_fields(&mut self, existing: &Self) {
        let meta = self.meta_mut();
        meta.resource_version = existing.meta().resource_version;
        meta.uid.clone_from(&existing.meta().uid);
    }
}

macro_rules! impl_object {
    ($ty:ty, $kind:literal) => {
        impl Object for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

/// Opaque string entries, stored decoded
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Secret {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    #[must_use]
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            data: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

impl_object!(Secret, "Secret");

/// Non-sensitive string entries
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigMap {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl_object!(ConfigMap, "ConfigMap");

/// A port exposed by a [`Service`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// `None` for headless services
    pub cluster_ip: Option<String>,
    pub ports: Vec<PortSpec>,
    pub selector: BTreeMap<String, String>,
    pub publish_not_ready_addresses: bool,
}

/// Stable network identity for the pods of a replica set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub spec: ServiceSpec,
}

impl Service {
    /// Port numbers in declaration order
    #[must_use]
    pub fn port_numbers(&self) -> Vec<u16> {
        self.spec.ports.iter().map(|p| p.port).collect()
    }
}

impl_object!(Service, "Service");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    #[must_use]
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VolumeSource {
    EmptyDir,
    Secret {
        secret_name: String,
        /// File mode of the projected entries
        mode: Option<u32>,
    },
    ConfigMap {
        name: String,
    },
    /// Backed by a per-pod persistent claim
    Claim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

impl Volume {
    #[must_use]
    pub fn empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource::EmptyDir,
        }
    }

    #[must_use]
    pub fn secret(name: impl Into<String>, secret_name: impl Into<String>, mode: Option<u32>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource::Secret {
                secret_name: secret_name.into(),
                mode,
            },
        }
    }

    #[must_use]
    pub fn config_map(name: impl Into<String>, config_map: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource::ConfigMap {
                name: config_map.into(),
            },
        }
    }
}

/// Compute resource limits and requests, e.g. `cpu -> "1"`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl Container {
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mount(&self, volume: &str) -> Option<&VolumeMount> {
        self.volume_mounts.iter().find(|m| m.name == volume)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    pub labels: BTreeMap<String, String>,
    pub service_account_name: String,
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

impl PodTemplate {
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateStrategy {
    #[default]
    RollingUpdate,
    /// Pods are replaced only when deleted, letting the agent drive upgrades
    OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaim {
    pub name: String,
    pub storage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    pub replicas: u32,
    pub service_name: String,
    pub selector: BTreeMap<String, String>,
    pub update_strategy: UpdateStrategy,
    pub template: PodTemplate,
    pub volume_claim_templates: Vec<VolumeClaim>,
}

/// Observed state, written by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub updated_replicas: u32,
}

/// Ordered group of identical pods named `{name}-{ordinal}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatefulSet {
    pub meta: ObjectMeta,
    pub spec: StatefulSetSpec,
    #[serde(default)]
    pub status: StatefulSetStatus,
}

impl StatefulSet {
    /// Every desired pod is running and ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.ready_replicas == self.spec.replicas
            && self.status.updated_replicas == self.spec.replicas
    }

    /// Pod names this object is expected to own
    #[must_use]
    pub fn pod_names(&self) -> Vec<String> {
        (0..self.spec.replicas)
            .map(|i| format!("{}-{i}", self.meta.name))
            .collect()
    }
}

impl Object for StatefulSet {
    const KIND: &'static str = "StatefulSet";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn carry_server_fields(&mut self, existing: &Self) {
        self.meta.resource_version = existing.meta.resource_version;
        self.meta.uid.clone_from(&existing.meta.uid);
        self.status = existing.status;
    }
}

/// A running pod; only metadata is inspected
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pod {
    pub meta: ObjectMeta,
}

impl_object!(Pod, "Pod");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_needs_every_replica_updated_and_ready() {
        let mut sts = StatefulSet {
            meta: ObjectMeta::new("ns", "rs"),
            spec: StatefulSetSpec {
                replicas: 3,
                ..StatefulSetSpec::default()
            },
            status: StatefulSetStatus {
                replicas: 3,
                ready_replicas: 3,
                updated_replicas: 2,
            },
        };
        assert!(!sts.is_ready());
        sts.status.updated_replicas = 3;
        assert!(sts.is_ready());
        assert_eq!(sts.pod_names(), vec!["rs-0", "rs-1", "rs-2"]);
    }

    #[test]
    fn update_keeps_observed_status() {
        let mut existing = StatefulSet::default();
        existing.meta.resource_version = 7;
        existing.status.ready_replicas = 2;
        let mut desired = StatefulSet::default();
        desired.carry_server_fields(&existing);
        assert_eq!(desired.meta.resource_version, 7);
        assert_eq!(desired.status.ready_replicas, 2);
    }

    #[test]
    fn key_display() {
        assert_eq!(ObjectKey::new("ns", "rs").to_string(), "ns/rs");
    }
}
