//! Entry point called by the work-queue dispatcher
//!
//! One call runs one step of the convergence machine for one resource. On
//! failure the state record is reset so the next call starts a fresh attempt,
//! and the error is reported on the resource status.

use crate::config::OperatorConfig;
use crate::context::ReconcileContext;
use crate::error::ReconcileError;
use crate::objects::ObjectKey;
use crate::record_store::AnnotationRecordStore;
use crate::resource::ReplicaSet;
use crate::status::{update_status, StatusOptions};
use crate::steps::build_machine;
use crate::store::{get_optional, Cluster};
use crate::telemetry::reconcile_span;
use crate::users::Credentials;
use replset_statemachine::{Machine, Requeue};
use std::sync::Arc;
use tracing::Span;

/// Reconciles replica-set resources against a [`Cluster`]
#[derive(Clone)]
pub struct Reconciler {
    cluster: Arc<dyn Cluster>,
    config: Arc<OperatorConfig>,
    credentials: Credentials,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, config: OperatorConfig) -> Self {
        Self {
            cluster,
            config: Arc::new(config),
            credentials: Credentials::default(),
        }
    }

    /// Replace the credential derivers
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Run the next step for the resource at `key`
    ///
    /// A resource that no longer exists needs nothing. A step that fails the
    /// resource also resets the state record, so the next spec edit starts over
    /// from validation.
    ///
    /// # Errors
    /// Whatever aborted the step; the state record has been reset and the
    /// status message updated by the time this returns
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let span = reconcile_span(&key.namespace, &key.name);
        let Some(resource) = get_optional(self.cluster.replica_sets(), key).await? else {
            tracing::debug!(parent: &span, "resource no longer exists");
            return Ok(Requeue::Never);
        };

        let store = Arc::new(AnnotationRecordStore::new(
            Arc::clone(&self.cluster),
            key.clone(),
            self.config.conflict_retry(),
        ));
        let machine = build_machine(store, span.clone());

        let result = match ReconcileContext::load(
            Arc::clone(&self.cluster),
            Arc::clone(&self.config),
            self.credentials.clone(),
            resource.clone(),
            span.clone(),
        )
        .await
        {
            Ok(mut ctx) => machine.reconcile(&mut ctx).await.map_err(ReconcileError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                tracing::debug!(parent: &span, requeue = ?outcome.requeue, completed = outcome.completed, "pass done");
                if outcome.is_halted() {
                    // a failed step waits for a spec edit, which must be validated again
                    if let Err(e) = machine.reset().await {
                        tracing::warn!(parent: &span, error = %ReconcileError::from(e), "could not reset state record");
                    }
                }
                Ok(outcome.requeue)
            }
            Err(e) => {
                self.recover(&machine, &resource, &e, &span).await;
                Err(e)
            }
        }
    }

    /// Reset the record and surface `error` on the status
    async fn recover(
        &self,
        machine: &Machine<ReconcileContext, ReconcileError>,
        resource: &ReplicaSet,
        error: &ReconcileError,
        span: &Span,
    ) {
        tracing::error!(parent: span, error = %error, "reconciliation failed");
        if let Err(e) = machine.reset().await {
            tracing::warn!(parent: span, error = %ReconcileError::from(e), "could not reset state record");
        }
        let options = if error.is_terminal() {
            StatusOptions::failed(error.to_string())
        } else {
            StatusOptions::message_only(error.to_string())
        };
        if let Err(e) = update_status(
            self.cluster.as_ref(),
            resource,
            &options,
            self.config.conflict_retry(),
            span,
        )
        .await
        {
            tracing::warn!(parent: span, error = %e, "could not report failure on status");
        }
    }
}
