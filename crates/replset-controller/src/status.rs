//! Status updates
//!
//! A [`StatusOptions`] collects the fields a step wants to report and is
//! applied in a single optimistic read-modify-write of the resource.

use crate::error::{is_transient_message, StoreError};
use crate::resource::{Phase, ReplicaSet, ReplicaSetStatus};
use crate::store::{update_with, Cluster};
use replset_statemachine::{Requeue, RetryPolicy, StepOutcome};
use std::time::Duration;
use tracing::Span;

/// Composable status change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOptions {
    phase: Option<Phase>,
    message: Option<String>,
    retry_after: Option<Duration>,
    members: Option<u32>,
    arbiters: Option<u32>,
    mongo_uri: Option<String>,
    version: Option<String>,
}

impl StatusOptions {
    /// Waiting on something outside the operator, check again after `retry`
    #[must_use]
    pub fn pending(message: impl Into<String>, retry: Duration) -> Self {
        Self {
            phase: Some(Phase::Pending),
            message: Some(message.into()),
            retry_after: Some(retry),
            ..Self::default()
        }
    }

    /// Only a corrected spec helps
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: Some(Phase::Failed),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn running() -> Self {
        Self {
            phase: Some(Phase::Running),
            message: Some(String::new()),
            ..Self::default()
        }
    }

    /// Replace the message and keep the phase
    #[must_use]
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Realized data-bearing members and pod-group replicas
    #[inline]
    #[must_use]
    pub fn with_members(mut self, members: u32) -> Self {
        self.members = Some(members);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_arbiters(mut self, arbiters: u32) -> Self {
        self.arbiters = Some(arbiters);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_mongo_uri(mut self, uri: impl Into<String>) -> Self {
        self.mongo_uri = Some(uri.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// When the reconciler should come back
    #[must_use]
    pub fn requeue(&self) -> Requeue {
        match (self.phase, self.retry_after) {
            (Some(Phase::Pending), Some(delay)) => Requeue::After(delay),
            (Some(Phase::Failed), _) => Requeue::Never,
            _ => Requeue::Immediate,
        }
    }

    /// Step outcome matching the reported phase
    ///
    /// Pending retries the step, Failed halts it, anything else completes.
    #[must_use]
    pub fn outcome(&self) -> StepOutcome {
        match self.requeue() {
            Requeue::After(delay) => StepOutcome::retry_after(delay),
            Requeue::Never => StepOutcome::halt(),
            Requeue::Immediate => StepOutcome::complete(),
        }
    }

    /// Write the collected fields into `status`
    ///
    /// Messages about transient write conflicts are dropped.
    pub fn apply(&self, status: &mut ReplicaSetStatus) {
        if let Some(phase) = self.phase {
            status.phase = Some(phase);
        }
        if let Some(message) = self.message.as_deref().filter(|m| !is_transient_message(m)) {
            status.message = message.to_string();
        }
        if let Some(members) = self.members {
            status.current_mongodb_members = members;
            status.current_stateful_set_replicas = members;
        }
        if let Some(arbiters) = self.arbiters {
            status.current_mongodb_arbiters = arbiters;
            status.current_stateful_set_arbiters_replicas = arbiters;
        }
        if let Some(uri) = &self.mongo_uri {
            status.mongo_uri.clone_from(uri);
        }
        if let Some(version) = &self.version {
            status.version.clone_from(version);
        }
    }
}

/// Apply `options` to the stored resource
///
/// # Errors
/// Store failures, including conflicts left after `policy` runs out
pub async fn update_status(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    options: &StatusOptions,
    policy: RetryPolicy,
    span: &Span,
) -> Result<ReplicaSet, StoreError> {
    let updated = update_with(cluster.replica_sets(), &resource.meta.key(), policy, |rs: &mut ReplicaSet| {
        options.apply(&mut rs.status);
    })
    .await?;
    tracing::debug!(
        parent: span,
        phase = ?updated.status.phase,
        message = %updated.status.message,
        "status updated"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pending_retries_after_delay() {
        let options = StatusOptions::pending("waiting", Duration::from_secs(10));
        assert_eq!(options.requeue(), Requeue::After(Duration::from_secs(10)));
        assert_eq!(options.outcome(), StepOutcome::retry_after(Duration::from_secs(10)));
        assert_eq!(StatusOptions::failed("bad").outcome(), StepOutcome::halt());
        assert_eq!(StatusOptions::running().outcome(), StepOutcome::complete());
    }

    #[test]
    fn counts_set_both_fields() {
        let mut status = ReplicaSetStatus::default();
        StatusOptions::running()
            .with_members(3)
            .with_arbiters(1)
            .with_mongo_uri("mongodb://x")
            .apply(&mut status);
        assert_eq!(status.phase, Some(Phase::Running));
        assert_eq!(status.current_mongodb_members, 3);
        assert_eq!(status.current_stateful_set_replicas, 3);
        assert_eq!(status.current_stateful_set_arbiters_replicas, 1);
        assert_eq!(status.mongo_uri, "mongodb://x");
    }

    #[test]
    fn conflict_messages_are_not_written() {
        let mut status = ReplicaSetStatus {
            phase: Some(Phase::Running),
            message: "previous".into(),
            ..ReplicaSetStatus::default()
        };
        StatusOptions::message_only("Operation cannot be fulfilled: the object has been modified").apply(&mut status);
        assert_eq!(status.message, "previous");
        assert_eq!(status.phase, Some(Phase::Running));
    }
}
