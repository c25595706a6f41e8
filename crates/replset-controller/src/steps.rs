//! Convergence steps and the graph connecting them
//!
//! ```text
//! Start -> ValidateSpec -> CreateService -+-> TLSValidation -> TLSResources -+
//!                                         |                                  |
//!                                         +----------------------------------+
//!                                         |
//!              topology first?  yes: DeployTopologyDocument -> DeployRuntimeObjects
//!                               no:  DeployRuntimeObjects -> DeployTopologyDocument
//!                                         |
//!                                   UpdateStatus -> End
//! ```
//!
//! Each step is safe to run again from scratch: the machine discards history
//! whenever a pass fails.

use crate::agent::{all_reached_goal_state, pod_states};
use crate::construct;
use crate::context::ReconcileContext;
use crate::error::ReconcileError;
use crate::objects::StatefulSet;
use crate::resource::{ReplicaSet, LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION, LAST_VERSION_ANNOTATION};
use crate::status::{update_status, StatusOptions};
use crate::store::{create_or_update, delete_if_exists, get_optional, update_with};
use crate::tls::{ensure_operator_secrets, read_material};
use crate::topology;
use crate::users::{ensure_connection_string_secrets, stale_user_secrets};
use crate::validation::validate;
use replset_rollout::ROLLED_OUT_ANNOTATION;
use replset_statemachine::{Guard, Machine, NoopStep, RecordStore, Requeue, Step, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

pub const START: &str = "Start";
pub const VALIDATE_SPEC: &str = "ValidateSpec";
pub const CREATE_SERVICE: &str = "CreateService";
pub const TLS_VALIDATION: &str = "TLSValidation";
pub const TLS_RESOURCES: &str = "TLSResources";
pub const DEPLOY_TOPOLOGY_DOCUMENT: &str = "DeployTopologyDocument";
pub const DEPLOY_RUNTIME_OBJECTS: &str = "DeployRuntimeObjects";
pub const UPDATE_STATUS: &str = "UpdateStatus";
pub const END: &str = "End";

fn tls_not_ready(delay: Duration) -> String {
    format!("TLS config is not yet valid, retrying in {} seconds", delay.as_secs())
}

fn not_ready(delay: Duration) -> String {
    format!("ReplicaSet is not yet ready, retrying in {} seconds", delay.as_secs())
}

/// Write `options` and turn them into the step outcome
async fn report(ctx: &ReconcileContext, options: StatusOptions) -> Result<StepOutcome, ReconcileError> {
    update_status(
        ctx.cluster(),
        &ctx.resource,
        &options,
        ctx.config.conflict_retry(),
        &ctx.span,
    )
    .await?;
    Ok(options.outcome())
}

/// Rejects illegal specs and spec transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateSpec;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for ValidateSpec {
    fn name(&self) -> &str {
        VALIDATE_SPEC
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let last = ctx.resource.last_successful_spec()?;
        match validate(&ctx.resource.spec, last.as_ref()) {
            Ok(()) => Ok(StepOutcome::complete()),
            Err(e) => {
                let e = ReconcileError::from(e);
                tracing::warn!(parent: &ctx.span, error = %e, "spec rejected");
                report(ctx, StatusOptions::failed(e.to_string())).await
            }
        }
    }
}

/// Headless service, dual-ported while a port migration is underway
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateService;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for CreateService {
    fn name(&self) -> &str {
        CREATE_SERVICE
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let coordinator = ctx.port_coordinator().await?;
        let plan = coordinator.plan();
        let service = construct::service(&ctx.resource, &coordinator.service_ports(&plan));
        let service = create_or_update(ctx.cluster().services(), service).await?;
        tracing::debug!(parent: &ctx.span, ports = ?service.port_numbers(), "service in place");
        Ok(StepOutcome::complete())
    }
}

/// Waits until the referenced certificate objects are complete
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsValidation;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for TlsValidation {
    fn name(&self) -> &str {
        TLS_VALIDATION
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        match read_material(ctx.cluster(), &ctx.resource).await? {
            Ok(_) => Ok(StepOutcome::complete()),
            Err(e) => {
                tracing::warn!(parent: &ctx.span, error = %e, "TLS config is not yet valid");
                let delay = ctx.config.not_ready_retry();
                report(ctx, StatusOptions::pending(tls_not_ready(delay), delay)).await
            }
        }
    }
}

/// Copies the certificate bundles into operator-owned secrets
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsResources;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for TlsResources {
    fn name(&self) -> &str {
        TLS_RESOURCES
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let material = match read_material(ctx.cluster(), &ctx.resource).await? {
            Ok(material) => material,
            Err(e) => {
                tracing::warn!(parent: &ctx.span, error = %e, "TLS config changed underneath");
                let delay = ctx.config.not_ready_retry();
                return report(ctx, StatusOptions::pending(tls_not_ready(delay), delay)).await;
            }
        };
        ensure_operator_secrets(ctx.cluster(), &ctx.resource, &material, &ctx.span).await?;
        Ok(StepOutcome::complete())
    }
}

/// A collaborator is not in place yet; another pass may succeed
fn is_missing_dependency(e: &ReconcileError) -> bool {
    matches!(e, ReconcileError::Build(_) | ReconcileError::Credentials(_)) && e.is_retryable()
}

/// Builds, persists and waits for the topology document
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployTopologyDocument;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for DeployTopologyDocument {
    fn name(&self) -> &str {
        DEPLOY_TOPOLOGY_DOCUMENT
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let delay = ctx.config.not_ready_retry();
        let coordinator = ctx.port_coordinator().await?;
        let plan = coordinator.plan();
        let doc = match topology::build_document(ctx, &coordinator, &plan).await {
            Ok(doc) => doc,
            Err(e) if e.is_terminal() => {
                tracing::warn!(parent: &ctx.span, error = %e, "topology document cannot be built");
                return report(ctx, StatusOptions::failed(e.to_string())).await;
            }
            Err(e) if is_missing_dependency(&e) => {
                tracing::info!(parent: &ctx.span, error = %e, "topology document waiting on a dependency");
                return report(ctx, StatusOptions::pending(e.to_string(), delay)).await;
            }
            Err(e) => return Err(e),
        };

        topology::persist(
            ctx.cluster(),
            &ctx.resource,
            ctx.live_document.as_ref(),
            &doc,
            &ctx.span,
        )
        .await?;

        let targets = ctx.targets();
        let states = pod_states(
            ctx.cluster(),
            &ctx.resource,
            targets.members,
            targets.arbiters,
            doc.version,
        )
        .await?;
        if !all_reached_goal_state(&states, &ctx.span) {
            return report(ctx, StatusOptions::pending(not_ready(delay), delay)).await;
        }
        Ok(StepOutcome::complete())
    }
}

/// Pod groups for members and arbiters, one member per pass
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployRuntimeObjects;

impl DeployRuntimeObjects {
    async fn is_ready(ctx: &ReconcileContext, name: String) -> Result<bool, ReconcileError> {
        let current = get_optional(ctx.cluster().stateful_sets(), &ctx.resource.key_of(&name)).await?;
        Ok(current.as_ref().map_or(true, StatefulSet::is_ready))
    }
}

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for DeployRuntimeObjects {
    fn name(&self) -> &str {
        DEPLOY_RUNTIME_OBJECTS
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let targets = ctx.targets();
        let members = construct::members_stateful_set(&ctx.resource, &ctx.config, targets.members);
        create_or_update(ctx.cluster().stateful_sets(), members).await?;
        if targets.arbiters > 0 || ctx.arbiters_stateful_set.is_some() {
            let arbiters = construct::arbiters_stateful_set(&ctx.resource, &ctx.config, targets.arbiters);
            create_or_update(ctx.cluster().stateful_sets(), arbiters).await?;
        }
        tracing::info!(
            parent: &ctx.span,
            members = targets.members,
            arbiters = targets.arbiters,
            "pod groups applied"
        );

        let ready = Self::is_ready(ctx, ctx.resource.stateful_set_name()).await?
            && Self::is_ready(ctx, ctx.resource.arbiters_stateful_set_name()).await?;
        if !ready {
            let delay = ctx.config.not_ready_retry();
            return report(ctx, StatusOptions::pending(not_ready(delay), delay)).await;
        }
        Ok(StepOutcome::complete())
    }
}

/// Records the outcome of the attempt on the resource
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStatus;

impl UpdateStatus {
    async fn delete_stale_user_secrets(ctx: &ReconcileContext) -> Result<(), ReconcileError> {
        let Some(last) = ctx.resource.last_successful_spec()? else {
            return Ok(());
        };
        for name in stale_user_secrets(&ctx.resource.spec.users, &last.users, ctx.resource.name()) {
            if delete_if_exists(ctx.cluster().secrets(), &ctx.resource.key_of(&name)).await? {
                tracing::info!(parent: &ctx.span, secret = %name, "deleted secret of removed user");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for UpdateStatus {
    fn name(&self) -> &str {
        UPDATE_STATUS
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        let resource = &ctx.resource;
        let spec = &resource.spec;
        let targets = ctx.targets();
        let domain = ctx.config.cluster_domain.as_str();

        let coordinator = ctx.port_coordinator().await?;
        let service = construct::service(resource, &coordinator.current_service_ports());
        create_or_update(ctx.cluster().services(), service).await?;

        ensure_connection_string_secrets(ctx.cluster(), resource, targets.members, domain, &ctx.span).await?;
        Self::delete_stale_user_secrets(ctx).await?;

        let options = if targets.members == spec.members && targets.arbiters == spec.arbiter_count() {
            StatusOptions::running()
        } else {
            StatusOptions::pending(
                format!(
                    "Performing scaling operation, currentMembers={}, desiredMembers={}",
                    targets.members, spec.members
                ),
                ctx.config.not_ready_retry(),
            )
        }
        .with_members(targets.members)
        .with_arbiters(targets.arbiters)
        .with_mongo_uri(resource.mongo_uri(targets.members, domain))
        .with_version(spec.version.clone());

        let spec_json = serde_json::to_string(spec)?;
        let version = spec.version.clone();
        let tls = spec.security.tls.enabled;
        update_with(
            ctx.cluster().replica_sets(),
            &resource.meta.key(),
            ctx.config.conflict_retry(),
            |rs: &mut ReplicaSet| {
                let annotations = &mut rs.meta.annotations;
                annotations.insert(LAST_VERSION_ANNOTATION.to_string(), version.clone());
                annotations.insert(LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION.to_string(), spec_json.clone());
                if tls {
                    annotations.insert(ROLLED_OUT_ANNOTATION.to_string(), "true".to_string());
                }
                options.apply(&mut rs.status);
            },
        )
        .await?;
        tracing::info!(
            parent: &ctx.span,
            phase = ?options.phase(),
            members = targets.members,
            arbiters = targets.arbiters,
            "status updated"
        );
        Ok(StepOutcome::complete())
    }
}

/// Ends the attempt; asks for another one while convergence is unfinished
#[derive(Debug, Clone, Copy, Default)]
pub struct End;

#[async_trait::async_trait]
impl Step<ReconcileContext, ReconcileError> for End {
    fn name(&self) -> &str {
        END
    }

    async fn reconcile(&self, ctx: &mut ReconcileContext) -> Result<StepOutcome, ReconcileError> {
        if ctx.needs_another_attempt() {
            return Ok(StepOutcome::complete_with(Requeue::Immediate));
        }
        tracing::info!(parent: &ctx.span, "replica set converged");
        Ok(StepOutcome::complete_with(Requeue::Never))
    }
}

/// The convergence graph over a record kept in `store`
#[must_use]
pub fn build_machine(store: Arc<dyn RecordStore>, span: Span) -> Machine<ReconcileContext, ReconcileError> {
    let mut machine = Machine::new(NoopStep::new(START), store).with_span(span);
    machine
        .add_step(ValidateSpec)
        .add_step(CreateService)
        .add_step(TlsValidation)
        .add_step(TlsResources)
        .add_step(DeployTopologyDocument)
        .add_step(DeployRuntimeObjects)
        .add_step(UpdateStatus)
        .add_step(End);

    let topology_first = || Guard::new(ReconcileContext::topology_first);
    machine
        .add_direct_transition(START, VALIDATE_SPEC)
        .add_direct_transition(VALIDATE_SPEC, CREATE_SERVICE)
        .add_transition(CREATE_SERVICE, TLS_VALIDATION, Guard::new(ReconcileContext::tls_enabled))
        .add_transition(CREATE_SERVICE, DEPLOY_TOPOLOGY_DOCUMENT, topology_first())
        .add_direct_transition(CREATE_SERVICE, DEPLOY_RUNTIME_OBJECTS)
        .add_direct_transition(TLS_VALIDATION, TLS_RESOURCES)
        .add_transition(TLS_RESOURCES, DEPLOY_TOPOLOGY_DOCUMENT, topology_first())
        .add_direct_transition(TLS_RESOURCES, DEPLOY_RUNTIME_OBJECTS)
        .add_transition(
            DEPLOY_TOPOLOGY_DOCUMENT,
            DEPLOY_RUNTIME_OBJECTS,
            Guard::not_visited(DEPLOY_RUNTIME_OBJECTS),
        )
        .add_direct_transition(DEPLOY_TOPOLOGY_DOCUMENT, UPDATE_STATUS)
        .add_transition(
            DEPLOY_RUNTIME_OBJECTS,
            DEPLOY_TOPOLOGY_DOCUMENT,
            Guard::not_visited(DEPLOY_TOPOLOGY_DOCUMENT),
        )
        .add_direct_transition(DEPLOY_RUNTIME_OBJECTS, UPDATE_STATUS)
        .add_direct_transition(UPDATE_STATUS, END);
    machine
}
