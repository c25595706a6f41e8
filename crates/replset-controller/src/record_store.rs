//! State record persisted as an annotation on the resource itself

use crate::objects::ObjectKey;
use crate::resource::{ReplicaSet, STATE_MACHINE_ANNOTATION};
use crate::store::{update_with, Cluster};
use replset_statemachine::{RecordStore, RecordStoreError, RetryPolicy, StateRecord};
use std::sync::Arc;

/// [`RecordStore`] backed by the `mongodb.com/v1.stateMachine` annotation
pub struct AnnotationRecordStore {
    cluster: Arc<dyn Cluster>,
    key: ObjectKey,
    policy: RetryPolicy,
}

impl AnnotationRecordStore {
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, key: ObjectKey, policy: RetryPolicy) -> Self {
        Self { cluster, key, policy }
    }
}

#[async_trait::async_trait]
impl RecordStore for AnnotationRecordStore {
    async fn load(&self) -> Result<Option<StateRecord>, RecordStoreError> {
        let resource = self.cluster.replica_sets().get(&self.key).await?;
        let Some(raw) = resource.meta.annotation(STATE_MACHINE_ANNOTATION) else {
            return Ok(None);
        };
        Ok(Some(StateRecord::from_json(raw)?))
    }

    async fn save(&self, record: &StateRecord) -> Result<(), RecordStoreError> {
        let raw = record.to_json()?;
        update_with(self.cluster.replica_sets(), &self.key, self.policy, |rs: &mut ReplicaSet| {
            rs.meta
                .annotations
                .insert(STATE_MACHINE_ANNOTATION.to_string(), raw.clone());
        })
        .await?;
        Ok(())
    }
}
