//! Stand-in for the kubelet and the automation agents
//!
//! Each [`ClusterSimulator::tick`] brings pod groups to their requested size
//! and readiness, then lets every agent apply the live topology document.

use crate::memory::MemoryCluster;
use replset_controller::agent::AGENT_VERSION_ANNOTATION;
use replset_controller::objects::{ObjectMeta, Pod, StatefulSetStatus};
use replset_controller::topology::TOPOLOGY_DOCUMENT_KEY;
use replset_topology::TopologyDocument;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Label tying a simulated pod to its pod group
pub const POD_GROUP_LABEL: &str = "statefulset";

/// Moves the in-memory cluster forward between reconciliation passes
pub struct ClusterSimulator {
    cluster: Arc<MemoryCluster>,
    kubelet_paused: AtomicBool,
    agents_paused: AtomicBool,
}

impl ClusterSimulator {
    #[must_use]
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            cluster,
            kubelet_paused: AtomicBool::new(false),
            agents_paused: AtomicBool::new(false),
        }
    }

    /// Pod groups stop becoming ready
    pub fn pause_kubelet(&self, paused: bool) {
        self.kubelet_paused.store(paused, Ordering::SeqCst);
    }

    /// Agents stop applying new documents
    pub fn pause_agents(&self, paused: bool) {
        self.agents_paused.store(paused, Ordering::SeqCst);
    }

    /// One round of kubelet and agent work
    pub fn tick(&self) {
        if !self.kubelet_paused.load(Ordering::SeqCst) {
            self.settle_pod_groups();
        }
        if !self.agents_paused.load(Ordering::SeqCst) {
            self.apply_documents();
        }
    }

    fn settle_pod_groups(&self) {
        for sts in self.cluster.stateful_sets.list() {
            let replicas = sts.spec.replicas;
            let name = sts.meta.name.clone();
            let namespace = sts.meta.namespace.clone();
            self.cluster.stateful_sets.modify(&sts.meta.key(), |s| {
                s.status = StatefulSetStatus {
                    replicas,
                    ready_replicas: replicas,
                    updated_replicas: replicas,
                };
            });

            let wanted = sts.pod_names();
            for pod in self.cluster.pods.list() {
                let owned = pod.meta.labels.get(POD_GROUP_LABEL) == Some(&name);
                if owned && !wanted.contains(&pod.meta.name) {
                    self.cluster.pods.remove(&pod.meta.key());
                }
            }
            for pod_name in wanted {
                let key = replset_controller::ObjectKey::new(&namespace, &pod_name);
                if !self.cluster.pods.contains(&key) {
                    let mut meta = ObjectMeta::new(&namespace, &pod_name);
                    meta.labels.insert(POD_GROUP_LABEL.to_string(), name.clone());
                    self.cluster.pods.put(Pod { meta });
                }
            }
        }
    }

    fn apply_documents(&self) {
        for rs in self.cluster.replica_sets.list() {
            let key = rs.key_of(rs.topology_secret_name());
            let Some(doc) = self
                .cluster
                .secrets
                .get_sync(&key)
                .and_then(|s| s.get(TOPOLOGY_DOCUMENT_KEY).map(str::to_string))
                .and_then(|raw| TopologyDocument::from_slice(raw.as_bytes()).ok())
            else {
                continue;
            };
            let version = doc.version.to_string();
            for process in &doc.processes {
                self.cluster.pods.modify(&rs.key_of(&process.name), |pod| {
                    pod.meta
                        .annotations
                        .insert(AGENT_VERSION_ANNOTATION.to_string(), version.clone());
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_controller::objects::{StatefulSet, StatefulSetSpec};
    use replset_controller::ObjectKey;

    fn sts(replicas: u32) -> StatefulSet {
        StatefulSet {
            meta: ObjectMeta::new("ns", "rs"),
            spec: StatefulSetSpec {
                replicas,
                ..StatefulSetSpec::default()
            },
            ..StatefulSet::default()
        }
    }

    #[test]
    fn pods_follow_replicas() {
        let cluster = MemoryCluster::new();
        let sim = ClusterSimulator::new(Arc::clone(&cluster));
        cluster.stateful_sets.put(sts(3));
        sim.tick();
        assert_eq!(cluster.pods.names(), vec!["rs-0", "rs-1", "rs-2"]);
        assert!(cluster.stateful_sets.get_sync(&ObjectKey::new("ns", "rs")).unwrap().is_ready());

        cluster.stateful_sets.modify(&ObjectKey::new("ns", "rs"), |s| s.spec.replicas = 2);
        sim.tick();
        assert_eq!(cluster.pods.names(), vec!["rs-0", "rs-1"]);
    }

    #[test]
    fn paused_kubelet_leaves_status_alone() {
        let cluster = MemoryCluster::new();
        let sim = ClusterSimulator::new(Arc::clone(&cluster));
        cluster.stateful_sets.put(sts(3));
        sim.pause_kubelet(true);
        sim.tick();
        assert!(cluster.pods.names().is_empty());
        assert!(!cluster.stateful_sets.get_sync(&ObjectKey::new("ns", "rs")).unwrap().is_ready());
    }
}
