//! Topology document assembly and persistence
//!
//! Gathers every collaborator the builder pipeline needs (credentials, TLS
//! bundles, port plan, metrics endpoint), builds the candidate and writes it
//! only when its version moved.

use crate::context::ReconcileContext;
use crate::error::ReconcileError;
use crate::metrics;
use crate::objects::Secret;
use crate::resource::ReplicaSet;
use crate::store::{create_or_update, get_optional, Cluster};
use crate::tls::read_material;
use crate::users::{build_auth, ensure_agent_password, ensure_keyfile, ensure_user_credentials};
use replset_rollout::{replicas_this_pass, PortMigrationCoordinator, PortPlan, ReplicaCounts, TlsModifier, TlsPhase};
use replset_topology::modifiers::{AdditionalArgsModifier, AuthModifier, CustomRolesModifier};
use replset_topology::{BuildError, TopologyBuilder, TopologyDocument};
use tracing::Span;

/// Entry of the topology secret holding the serialized document
pub const TOPOLOGY_DOCUMENT_KEY: &str = "cluster-config.json";

/// Member and arbiter counts applied by one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Targets {
    pub members: u32,
    pub arbiters: u32,
}

impl Targets {
    /// One step toward the desired counts
    #[must_use]
    pub fn new(members: ReplicaCounts, arbiters: ReplicaCounts) -> Self {
        Self {
            members: replicas_this_pass(&members),
            arbiters: replicas_this_pass(&arbiters),
        }
    }
}

/// The persisted document, `None` before the first write
///
/// # Errors
/// Store failures, or [`BuildError::Serialization`] for a corrupt document
pub async fn read_live(cluster: &dyn Cluster, resource: &ReplicaSet) -> Result<Option<TopologyDocument>, ReconcileError> {
    let secret = get_optional(cluster.secrets(), &resource.key_of(resource.topology_secret_name())).await?;
    let Some(raw) = secret.as_ref().and_then(|s| s.get(TOPOLOGY_DOCUMENT_KEY)) else {
        return Ok(None);
    };
    Ok(Some(TopologyDocument::from_slice(raw.as_bytes())?))
}

async fn tls_modifier(ctx: &ReconcileContext) -> Result<TlsModifier, ReconcileError> {
    let phase = ctx.tls_phase();
    let optional = ctx.resource.spec.security.tls.optional;
    if phase != TlsPhase::RolledOut {
        return Ok(TlsModifier::new(phase, optional, None));
    }
    let material = read_material(ctx.cluster(), &ctx.resource)
        .await?
        .map_err(|e| BuildError::missing("tls", e.to_string()))?;
    Ok(TlsModifier::new(phase, optional, Some(&material)))
}

/// Build the desired document for this pass
///
/// Returns the live document unchanged when nothing observable differs.
///
/// # Errors
/// - retryable [`BuildError`]s and missing passwords while collaborators are
///   not in place yet
/// - terminal [`BuildError`]s for malformed additional configuration
/// - store failures
pub async fn build_document(
    ctx: &ReconcileContext,
    coordinator: &PortMigrationCoordinator,
    plan: &PortPlan,
) -> Result<TopologyDocument, ReconcileError> {
    let resource = &ctx.resource;
    let cluster = ctx.cluster();
    let targets = ctx.targets();

    let agent_password = ensure_agent_password(cluster, resource, &ctx.span).await?;
    let keyfile = ensure_keyfile(cluster, resource, &ctx.span).await?;
    let mechanisms = resource.spec.security.authentication.mechanisms();
    let mut users = Vec::with_capacity(resource.spec.users.len());
    for user in &resource.spec.users {
        users.push(ensure_user_credentials(cluster, resource, user, &mechanisms, &ctx.credentials, &ctx.span).await?);
    }

    let mut builder = TopologyBuilder::new(resource.name(), resource.namespace())
        .with_service_name(resource.service_name())
        .with_cluster_domain(ctx.config.cluster_domain.clone())
        .with_members(targets.members)
        .with_arbiters(targets.arbiters)
        .with_mongodb_version(resource.spec.version.clone())
        .with_feature_compatibility_version(Some(resource.spec.feature_compatibility_version()))
        .with_previous(ctx.live_document.clone())
        .with_modifier(AuthModifier(build_auth(resource, agent_password, keyfile, users)))
        .with_modifier(CustomRolesModifier(resource.spec.security.roles.clone()))
        .with_modifier(tls_modifier(ctx).await?)
        .with_modifier(coordinator.modifier(plan))
        .with_modifier(AdditionalArgsModifier::new(&resource.spec.additional_mongod_config)?)
        .with_span(ctx.span.clone());
    if let Some(modifier) = metrics::modifier(cluster, resource, &ctx.span).await? {
        builder = builder.with_modifier(modifier);
    }
    Ok(builder.build()?)
}

/// Write `doc` unless its version matches the live one
///
/// Returns whether anything was written.
///
/// # Errors
/// Store failures, or [`BuildError::Serialization`]
pub async fn persist(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    live: Option<&TopologyDocument>,
    doc: &TopologyDocument,
    span: &Span,
) -> Result<bool, ReconcileError> {
    if live.is_some_and(|live| live.version == doc.version) {
        return Ok(false);
    }
    let secret = Secret::new(resource.owned_meta(resource.topology_secret_name()))
        .with_entry(TOPOLOGY_DOCUMENT_KEY, doc.to_json()?);
    create_or_update(cluster.secrets(), secret).await?;
    tracing::info!(parent: span, version = doc.version, "topology document persisted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_move_one_member_at_a_time() {
        let targets = Targets::new(ReplicaCounts::new(5, 3), ReplicaCounts::new(1, 0));
        assert_eq!(targets, Targets { members: 4, arbiters: 1 });

        let fresh = Targets::new(ReplicaCounts::new(3, 0), ReplicaCounts::new(0, 0));
        assert_eq!(fresh, Targets { members: 3, arbiters: 0 });
    }
}
