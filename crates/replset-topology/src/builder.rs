//! Rebuild-then-diff construction of the topology document
//!
//! The builder reconstructs the base structure (processes and replica set
//! membership) from scratch, applies every registered [`Modifier`] in
//! [`Stage`] order and finally compares the candidate with the previously
//! persisted document:
//!
//! - equivalent candidate: the previous document is returned untouched
//! - any difference: the candidate is returned with `version = previous + 1`
//!
//! The builder never persists anything itself.

use crate::document::{ReplicaSetConfig, ReplicaSetMember, TopologyDocument, PROTOCOL_VERSION};
use crate::error::BuildError;
use crate::process::Process;
use tracing::Span;

/// Default cluster DNS suffix
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Position of a modifier in the pipeline
///
/// Structural stages run first; [`Stage::AdditionalArgs`] runs last so that
/// user supplied per-process options can override anything before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Membership,
    Auth,
    Roles,
    Tls,
    Ports,
    Metrics,
    AdditionalArgs,
}

/// A field-level change applied on top of the rebuilt base document
pub trait Modifier: Send + Sync {
    /// Pipeline position
    fn stage(&self) -> Stage;

    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Apply the change
    ///
    /// # Errors
    /// Returns [`BuildError`] when a dependency is missing or input is malformed
    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError>;
}

/// Closure backed modifier
pub struct FnModifier<F> {
    stage: Stage,
    name: &'static str,
    f: F,
}

impl<F> FnModifier<F>
where
    F: Fn(&mut TopologyDocument) -> Result<(), BuildError> + Send + Sync,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(stage: Stage, name: &'static str, f: F) -> Self {
        Self { stage, name, f }
    }
}

impl<F> Modifier for FnModifier<F>
where
    F: Fn(&mut TopologyDocument) -> Result<(), BuildError> + Send + Sync,
{
    fn stage(&self) -> Stage {
        self.stage
    }

    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        (self.f)(doc)
    }
}

/// Builds the desired [`TopologyDocument`]
pub struct TopologyBuilder {
    name: String,
    namespace: String,
    service_name: String,
    cluster_domain: String,
    members: u32,
    arbiters: u32,
    mongodb_version: String,
    feature_compatibility_version: Option<String>,
    previous: Option<TopologyDocument>,
    modifiers: Vec<Box<dyn Modifier>>,
    span: Span,
}

impl TopologyBuilder {
    /// Start a builder for the replica set `name` in `namespace`
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            service_name: format!("{name}-svc"),
            name,
            namespace: namespace.into(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            members: 0,
            arbiters: 0,
            mongodb_version: String::new(),
            feature_compatibility_version: None,
            previous: None,
            modifiers: Vec::new(),
            span: Span::none(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_service_name(mut self, service: impl Into<String>) -> Self {
        self.service_name = service.into();
        self
    }

    /// Empty values fall back to [`DEFAULT_CLUSTER_DOMAIN`]
    #[inline]
    #[must_use]
    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        if !domain.is_empty() {
            self.cluster_domain = domain;
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn with_members(mut self, members: u32) -> Self {
        self.members = members;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_arbiters(mut self, arbiters: u32) -> Self {
        self.arbiters = arbiters;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_mongodb_version(mut self, version: impl Into<String>) -> Self {
        self.mongodb_version = version.into();
        self
    }

    /// Explicit FCV; defaults to `major.minor` of the version
    #[inline]
    #[must_use]
    pub fn with_feature_compatibility_version(mut self, fcv: Option<String>) -> Self {
        self.feature_compatibility_version = fcv;
        self
    }

    /// The document currently persisted, if any
    #[inline]
    #[must_use]
    pub fn with_previous(mut self, previous: Option<TopologyDocument>) -> Self {
        self.previous = previous;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_modifier(mut self, modifier: impl Modifier + 'static) -> Self {
        self.modifiers.push(Box::new(modifier));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_boxed_modifier(mut self, modifier: Box<dyn Modifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Span all builder diagnostics are attached to
    #[inline]
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fully qualified host name of a process
    #[must_use]
    pub fn host_name(&self, process_name: &str) -> String {
        format!(
            "{process_name}.{}.{}.svc.{}",
            self.service_name, self.namespace, self.cluster_domain
        )
    }

    fn fcv(&self) -> String {
        if let Some(fcv) = &self.feature_compatibility_version {
            return fcv.clone();
        }
        major_minor(&self.mongodb_version)
    }

    fn base_document(&self) -> TopologyDocument {
        let fcv = self.fcv();
        let mut processes = Vec::with_capacity((self.members + self.arbiters) as usize);
        let mut members = Vec::with_capacity(processes.capacity());

        for i in 0..self.members {
            let name = format!("{}-{i}", self.name);
            processes.push(Process::new(
                &name,
                self.host_name(&name),
                &self.name,
                &self.mongodb_version,
                &fcv,
            ));
            members.push(ReplicaSetMember::data(i, name));
        }
        for i in 0..self.arbiters {
            let name = format!("{}-arb-{i}", self.name);
            processes.push(Process::new(
                &name,
                self.host_name(&name),
                &self.name,
                &self.mongodb_version,
                &fcv,
            ));
            members.push(ReplicaSetMember::arbiter(self.members + i, name));
        }

        TopologyDocument {
            processes,
            replica_sets: vec![ReplicaSetConfig {
                id: self.name.clone(),
                members,
                protocol_version: PROTOCOL_VERSION.to_string(),
            }],
            extra: self
                .previous
                .as_ref()
                .map(|prev| prev.extra.clone())
                .unwrap_or_default(),
            ..TopologyDocument::default()
        }
    }

    /// Produce the desired document
    ///
    /// # Errors
    /// Propagates the first modifier failure; nothing is partially applied
    /// from the caller's point of view since the candidate is discarded.
    pub fn build(mut self) -> Result<TopologyDocument, BuildError> {
        let mut candidate = self.base_document();

        // stable: modifiers sharing a stage keep registration order
        self.modifiers.sort_by_key(|m| m.stage());
        for modifier in &self.modifiers {
            modifier.apply(&mut candidate).map_err(|e| {
                tracing::debug!(parent: &self.span, modifier = modifier.name(), error = %e, "modifier failed");
                e
            })?;
        }

        match self.previous.take() {
            Some(previous) if candidate.is_equivalent(&previous) => {
                tracing::debug!(parent: &self.span, version = previous.version, "topology document unchanged");
                Ok(previous)
            }
            Some(previous) => {
                candidate.version = previous.version + 1;
                tracing::debug!(parent: &self.span, version = candidate.version, "topology document changed");
                Ok(candidate)
            }
            None => {
                candidate.version = 1;
                Ok(candidate)
            }
        }
    }
}

/// `"6.0.5"` becomes `"6.0"`
#[must_use]
pub fn major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn builder() -> TopologyBuilder {
        TopologyBuilder::new("rs", "ns")
            .with_members(3)
            .with_mongodb_version("6.0.5")
    }

    #[test]
    fn base_structure_from_counts() {
        let doc = builder().with_arbiters(1).build().unwrap();
        assert_eq!(doc.version, 1);
        let names: Vec<_> = doc.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rs-0", "rs-1", "rs-2", "rs-arb-0"]);
        assert_eq!(doc.processes[0].host_name, "rs-0.rs-svc.ns.svc.cluster.local");
        assert_eq!(doc.processes[0].feature_compatibility_version, "6.0");
        let rs = &doc.replica_sets[0];
        assert_eq!(rs.id, "rs");
        assert_eq!(rs.members[3], ReplicaSetMember::arbiter(3, "rs-arb-0"));
        assert_eq!(doc.data_member_count(), 3);
    }

    #[test]
    fn unchanged_rebuild_keeps_previous_version() {
        let first = builder().build().unwrap();
        let mut persisted = first.clone();
        persisted.version = 9;
        let second = builder().with_previous(Some(persisted.clone())).build().unwrap();
        assert_eq!(second, persisted);
    }

    #[test]
    fn change_bumps_version_by_one() {
        let mut persisted = builder().build().unwrap();
        persisted.version = 4;
        let next = builder()
            .with_members(4)
            .with_previous(Some(persisted))
            .build()
            .unwrap();
        assert_eq!(next.version, 5);
        assert_eq!(next.processes.len(), 4);
    }

    #[test]
    fn modifiers_run_in_stage_order() {
        let doc = builder()
            .with_modifier(FnModifier::new(Stage::AdditionalArgs, "args", |d| {
                for p in &mut d.processes {
                    p.args.set("net.maxIncomingConnections", 10);
                }
                Ok(())
            }))
            .with_modifier(FnModifier::new(Stage::Auth, "auth", |d| {
                for p in &mut d.processes {
                    p.args.set("net.maxIncomingConnections", 1);
                }
                Ok(())
            }))
            .build()
            .unwrap();
        assert_eq!(
            doc.processes[0].args.get("net.maxIncomingConnections"),
            Some(&serde_json::json!(10))
        );
    }

    #[test]
    fn modifier_failure_aborts_build() {
        let err = builder()
            .with_modifier(FnModifier::new(Stage::Tls, "tls", |_| {
                Err(BuildError::missing("tls", "certificate secret"))
            }))
            .build()
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn agent_owned_fields_are_carried_forward() {
        let mut persisted = builder().build().unwrap();
        persisted
            .extra
            .insert("options".into(), serde_json::json!({"downloadBase": "/var/lib"}));
        let next = builder().with_previous(Some(persisted.clone())).build().unwrap();
        assert_eq!(next.version, persisted.version);
        assert_eq!(next.extra["options"]["downloadBase"], "/var/lib");
    }

    #[test]
    fn explicit_fcv_wins() {
        let doc = builder()
            .with_feature_compatibility_version(Some("5.0".into()))
            .build()
            .unwrap();
        assert!(doc.processes.iter().all(|p| p.feature_compatibility_version == "5.0"));
    }

    proptest! {
        #[test]
        fn version_moves_only_on_change(members in 1u32..7, extra in 0u32..3, start in 1u64..1000) {
            let mut persisted = builder().with_members(members).build().unwrap();
            persisted.version = start;

            let same = builder().with_members(members).with_previous(Some(persisted.clone())).build().unwrap();
            prop_assert_eq!(same.version, start);

            let changed = builder()
                .with_members(members + extra + 1)
                .with_previous(Some(persisted))
                .build()
                .unwrap();
            prop_assert_eq!(changed.version, start + 1);
        }
    }
}
