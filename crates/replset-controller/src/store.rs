//! Object store seam
//!
//! The controller never talks to a cluster API directly. Each object kind is
//! reached through an [`ObjectStore`], grouped by a [`Cluster`]. Updates are
//! optimistic: an update carrying a stale `resource_version` fails with
//! [`StoreError::Conflict`], which [`update_with`] retries with the
//! configured [`RetryPolicy`].

use crate::error::StoreError;
use crate::objects::{ConfigMap, Object, ObjectKey, Pod, Secret, Service, StatefulSet};
use crate::resource::ReplicaSet;
use replset_statemachine::{retry, RetryPolicy};

/// CRUD access to one kind of object
#[async_trait::async_trait]
pub trait ObjectStore<T: Object>: Send + Sync {
    /// # Errors
    /// [`StoreError::NotFound`] when absent
    async fn get(&self, key: &ObjectKey) -> Result<T, StoreError>;

    /// # Errors
    /// [`StoreError::AlreadyExists`] when the key is taken
    async fn create(&self, object: T) -> Result<T, StoreError>;

    /// Replace the stored object
    ///
    /// # Errors
    /// [`StoreError::Conflict`] when `resource_version` is stale,
    /// [`StoreError::NotFound`] when absent
    async fn update(&self, object: T) -> Result<T, StoreError>;

    /// # Errors
    /// [`StoreError::NotFound`] when absent
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Every store the reconciler needs
pub trait Cluster: Send + Sync {
    fn replica_sets(&self) -> &dyn ObjectStore<ReplicaSet>;
    fn secrets(&self) -> &dyn ObjectStore<Secret>;
    fn config_maps(&self) -> &dyn ObjectStore<ConfigMap>;
    fn services(&self) -> &dyn ObjectStore<Service>;
    fn stateful_sets(&self) -> &dyn ObjectStore<StatefulSet>;
    fn pods(&self) -> &dyn ObjectStore<Pod>;
}

/// `Ok(None)` instead of [`StoreError::NotFound`]
///
/// # Errors
/// Any other store failure
pub async fn get_optional<T: Object>(
    store: &dyn ObjectStore<T>,
    key: &ObjectKey,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create `desired` or overwrite the stored copy, keeping server fields
///
/// # Errors
/// Store failures, including conflicts with a concurrent writer
pub async fn create_or_update<T: Object>(store: &dyn ObjectStore<T>, mut desired: T) -> Result<T, StoreError> {
    match get_optional(store, &desired.key()).await? {
        None => store.create(desired).await,
        Some(existing) => {
            desired.carry_server_fields(&existing);
            store.update(desired).await
        }
    }
}

/// Delete, treating an absent object as deleted
///
/// # Errors
/// Any other store failure
pub async fn delete_if_exists<T: Object>(store: &dyn ObjectStore<T>, key: &ObjectKey) -> Result<bool, StoreError> {
    match store.delete(key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read, mutate and write back, retrying on conflict
///
/// # Errors
/// The last conflict once attempts run out, or any other store failure
pub async fn update_with<T, F>(
    store: &dyn ObjectStore<T>,
    key: &ObjectKey,
    policy: RetryPolicy,
    mutate: F,
) -> Result<T, StoreError>
where
    T: Object,
    F: Fn(&mut T) + Send + Sync,
{
    let mutate = &mutate;
    retry(policy, StoreError::is_conflict, move || async move {
        let mut object = store.get(key).await?;
        mutate(&mut object);
        store.update(object).await
    })
    .await
}
