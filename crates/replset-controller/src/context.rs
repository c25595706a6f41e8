//! Observed state for one reconciliation pass
//!
//! Loaded once per call before the machine picks a step. Guards read it
//! without touching storage, so every decision of a pass sees the same
//! snapshot.

use crate::agent::{pod_states, process_names};
use crate::config::OperatorConfig;
use crate::error::{ReconcileError, StoreError};
use crate::objects::{ObjectKey, StatefulSet};
use crate::resource::ReplicaSet;
use crate::store::{get_optional, Cluster};
use crate::topology::{self, Targets};
use crate::users::Credentials;
use replset_rollout::tls::is_rolled_out;
use replset_rollout::{
    decide, is_scaling_down, is_scaling_up, OrderingInputs, PortMigrationCoordinator, ReplicaCounts, TlsPhase,
};
use replset_topology::TopologyDocument;
use std::sync::Arc;
use tracing::Span;

/// Everything a step may read or write during one pass
pub struct ReconcileContext {
    pub cluster: Arc<dyn Cluster>,
    pub config: Arc<OperatorConfig>,
    pub credentials: Credentials,
    pub resource: ReplicaSet,
    pub stateful_set: Option<StatefulSet>,
    pub arbiters_stateful_set: Option<StatefulSet>,
    /// Document as last persisted, `None` before the first write
    pub live_document: Option<TopologyDocument>,
    pub span: Span,
}

impl std::fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("resource", &self.resource.meta.key())
            .field("stateful_set", &self.stateful_set.is_some())
            .field("live_version", &self.live_document.as_ref().map(|d| d.version))
            .finish_non_exhaustive()
    }
}

impl ReconcileContext {
    /// Snapshot the runtime objects and live document of `resource`
    ///
    /// # Errors
    /// Store failures, or a persisted document that cannot be decoded
    pub async fn load(
        cluster: Arc<dyn Cluster>,
        config: Arc<OperatorConfig>,
        credentials: Credentials,
        resource: ReplicaSet,
        span: Span,
    ) -> Result<Self, ReconcileError> {
        let stateful_set = get_optional(cluster.stateful_sets(), &resource.key_of(resource.stateful_set_name())).await?;
        let arbiters_stateful_set = get_optional(
            cluster.stateful_sets(),
            &resource.key_of(resource.arbiters_stateful_set_name()),
        )
        .await?;
        let live_document = topology::read_live(cluster.as_ref(), &resource).await?;
        Ok(Self {
            cluster,
            config,
            credentials,
            resource,
            stateful_set,
            arbiters_stateful_set,
            live_document,
            span,
        })
    }

    #[inline]
    #[must_use]
    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.resource.meta.key()
    }

    /// Desired and last realized data-bearing members
    #[must_use]
    pub fn members(&self) -> ReplicaCounts {
        ReplicaCounts::new(self.resource.spec.members, self.resource.status.current_mongodb_members)
    }

    /// Desired and last realized arbiters
    #[must_use]
    pub fn arbiters(&self) -> ReplicaCounts {
        ReplicaCounts::new(
            self.resource.spec.arbiter_count(),
            self.resource.status.current_mongodb_arbiters,
        )
    }

    /// Counts applied by this pass
    #[must_use]
    pub fn targets(&self) -> Targets {
        Targets::new(self.members(), self.arbiters())
    }

    #[inline]
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.resource.spec.security.tls.enabled
    }

    #[must_use]
    pub fn tls_phase(&self) -> TlsPhase {
        TlsPhase::from_flags(self.tls_enabled(), is_rolled_out(&self.resource.meta.annotations))
    }

    #[must_use]
    pub fn ordering_inputs(&self) -> OrderingInputs {
        let members = self.members();
        OrderingInputs {
            has_existing_runtime_objects: self.stateful_set.is_some(),
            is_scaling_up: is_scaling_up(&members),
            is_scaling_down: is_scaling_down(&members),
            is_changing_version: self.resource.is_changing_version(),
            tls_newly_enabling: self.tls_phase().is_newly_enabling(),
        }
    }

    /// Whether the topology document goes before the runtime objects
    #[must_use]
    pub fn topology_first(&self) -> bool {
        let decision = decide(&self.ordering_inputs());
        tracing::debug!(
            parent: &self.span,
            topology_first = decision.topology_first,
            rule = ?decision.rule,
            "ordering decided"
        );
        decision.topology_first
    }

    /// Port coordinator fed with the live document and pod goal states
    ///
    /// # Errors
    /// Store failures while reading pods
    pub async fn port_coordinator(&self) -> Result<PortMigrationCoordinator, StoreError> {
        let targets = self.targets();
        let (version, processes) = self
            .live_document
            .as_ref()
            .map_or((0, &[][..]), |doc| (doc.version, doc.processes.as_slice()));
        let states = pod_states(
            self.cluster(),
            &self.resource,
            targets.members,
            targets.arbiters,
            version,
        )
        .await?;
        Ok(PortMigrationCoordinator::new(self.resource.spec.expected_port(), states, processes)
            .with_span(self.span.clone()))
    }

    /// Ports of the live document that still differ from the requested one
    fn pending_port_changes(&self) -> usize {
        let Some(doc) = &self.live_document else {
            return 0;
        };
        let expected = self.resource.spec.expected_port();
        let targets = self.targets();
        process_names(&self.resource, targets.members, targets.arbiters)
            .iter()
            .filter_map(|(name, _)| doc.process(name))
            .filter(|p| p.port() != expected)
            .count()
    }

    /// The finished attempt left work for another one
    ///
    /// True while scaling has not reached the desired counts, while a port
    /// migration is underway, or when TLS was marked rolled out but the
    /// document does not enable it yet.
    #[must_use]
    pub fn needs_another_attempt(&self) -> bool {
        let status = &self.resource.status;
        let scaling = status.current_mongodb_members != self.resource.spec.members
            || status.current_mongodb_arbiters != self.resource.spec.arbiter_count();
        let ports = self.pending_port_changes();
        let tls = self.tls_phase() == TlsPhase::RolledOut
            && !self.live_document.as_ref().is_some_and(TopologyDocument::tls_enabled);
        if scaling || ports > 0 || tls {
            tracing::debug!(parent: &self.span, scaling, ports, tls, "convergence not finished");
            return true;
        }
        false
    }
}
