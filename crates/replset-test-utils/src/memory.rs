//! In-memory object store with optimistic concurrency

use async_trait::async_trait;
use dashmap::DashMap;
use replset_controller::objects::{ConfigMap, Object, ObjectKey, Pod, Secret, Service, StatefulSet};
use replset_controller::{Cluster, ObjectStore, ReplicaSet, StoreError};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Objects of one kind, keyed by namespace and name
pub struct MemoryStore<T> {
    objects: DashMap<ObjectKey, T>,
    versions: Arc<AtomicU64>,
    injected_conflicts: AtomicU32,
    updates: AtomicU64,
}

impl<T: Object> MemoryStore<T> {
    fn with_versions(versions: Arc<AtomicU64>) -> Self {
        Self {
            objects: DashMap::new(),
            versions,
            injected_conflicts: AtomicU32::new(0),
            updates: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fail the next `n` updates with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Current copy, `None` when absent
    pub fn get_sync(&self, key: &ObjectKey) -> Option<T> {
        self.objects.get(key).map(|o| o.clone())
    }

    /// Every object, sorted by key
    pub fn list(&self) -> Vec<T> {
        let mut objects: Vec<T> = self.objects.iter().map(|o| o.value().clone()).collect();
        objects.sort_by_key(Object::key);
        objects
    }

    /// Names of every object, sorted
    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|o| o.meta().name.clone()).collect()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Successful updates so far
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Insert or replace without a version check, as the cluster itself would
    pub fn put(&self, mut object: T) -> T {
        let meta = object.meta_mut();
        meta.resource_version = self.next_version();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        self.objects.insert(object.key(), object.clone());
        object
    }

    /// Mutate in place without a version check; `false` when absent
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut T)) -> bool {
        let Some(mut entry) = self.objects.get_mut(key) else {
            return false;
        };
        f(entry.value_mut());
        entry.value_mut().meta_mut().resource_version = self.next_version();
        true
    }

    /// Remove without going through the store API
    pub fn remove(&self, key: &ObjectKey) -> Option<T> {
        self.objects.remove(key).map(|(_, o)| o)
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        }
    }
}

#[async_trait]
impl<T: Object> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T, StoreError> {
        self.get_sync(key).ok_or_else(|| Self::not_found(key))
    }

    async fn create(&self, object: T) -> Result<T, StoreError> {
        let key = object.key();
        if self.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: T::KIND, key });
        }
        Ok(self.put(object))
    }

    async fn update(&self, mut object: T) -> Result<T, StoreError> {
        let key = object.key();
        let conflict = || StoreError::Conflict {
            kind: T::KIND,
            key: key.clone(),
        };
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(conflict());
        }

        let Some(mut entry) = self.objects.get_mut(&key) else {
            return Err(Self::not_found(&key));
        };
        if entry.meta().resource_version != object.meta().resource_version {
            return Err(conflict());
        }
        let meta = object.meta_mut();
        meta.resource_version = self.next_version();
        meta.uid.clone_from(&entry.meta().uid);
        *entry.value_mut() = object.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.remove(key).map(|_| ()).ok_or_else(|| Self::not_found(key))
    }
}

/// Every store a reconciler needs, sharing one resource version counter
pub struct MemoryCluster {
    pub replica_sets: MemoryStore<ReplicaSet>,
    pub secrets: MemoryStore<Secret>,
    pub config_maps: MemoryStore<ConfigMap>,
    pub services: MemoryStore<Service>,
    pub stateful_sets: MemoryStore<StatefulSet>,
    pub pods: MemoryStore<Pod>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        let versions = Arc::new(AtomicU64::new(0));
        Self {
            replica_sets: MemoryStore::with_versions(Arc::clone(&versions)),
            secrets: MemoryStore::with_versions(Arc::clone(&versions)),
            config_maps: MemoryStore::with_versions(Arc::clone(&versions)),
            services: MemoryStore::with_versions(Arc::clone(&versions)),
            stateful_sets: MemoryStore::with_versions(Arc::clone(&versions)),
            pods: MemoryStore::with_versions(versions),
        }
    }
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current copy of a replica set
    ///
    /// # Panics
    /// When the resource does not exist
    pub fn replica_set(&self, key: &ObjectKey) -> ReplicaSet {
        self.replica_sets.get_sync(key).expect("replica set exists")
    }
}

impl Cluster for MemoryCluster {
    fn replica_sets(&self) -> &dyn ObjectStore<ReplicaSet> {
        &self.replica_sets
    }

    fn secrets(&self) -> &dyn ObjectStore<Secret> {
        &self.secrets
    }

    fn config_maps(&self) -> &dyn ObjectStore<ConfigMap> {
        &self.config_maps
    }

    fn services(&self) -> &dyn ObjectStore<Service> {
        &self.services
    }

    fn stateful_sets(&self) -> &dyn ObjectStore<StatefulSet> {
        &self.stateful_sets
    }

    fn pods(&self) -> &dyn ObjectStore<Pod> {
        &self.pods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str) -> Secret {
        Secret::new(replset_controller::ObjectMeta::new("ns", name)).with_entry("k", "v")
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let cluster = MemoryCluster::default();
        let created = cluster.secrets().create(secret("a")).await.unwrap();
        assert!(!created.meta.uid.is_empty());

        let mut first = created.clone();
        first.data.insert("k".into(), "first".into());
        cluster.secrets().update(first).await.unwrap();

        let mut stale = created;
        stale.data.insert("k".into(), "stale".into());
        let err = cluster.secrets().update(stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(cluster.secrets.get_sync(&ObjectKey::new("ns", "a")).unwrap().get("k"), Some("first"));
    }

    #[tokio::test]
    async fn injected_conflicts_run_out() {
        let cluster = MemoryCluster::default();
        let created = cluster.secrets().create(secret("a")).await.unwrap();
        cluster.secrets.inject_conflicts(1);
        assert!(cluster.secrets().update(created.clone()).await.unwrap_err().is_conflict());
        cluster.secrets().update(created).await.unwrap();
        assert_eq!(cluster.secrets.update_count(), 1);
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let cluster = MemoryCluster::default();
        cluster.secrets().create(secret("a")).await.unwrap();
        assert!(cluster.secrets().create(secret("a")).await.unwrap_err().is_already_exists());
        cluster.secrets().delete(&ObjectKey::new("ns", "a")).await.unwrap();
        assert!(cluster.secrets().delete(&ObjectKey::new("ns", "a")).await.unwrap_err().is_not_found());
    }
}
