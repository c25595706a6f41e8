//! Port migration coordinator
//!
//! The agent cannot change the port of more than one process at a time, so
//! a port change on a running set is walked through one process per pass:
//!
//! - processes without a configured port (new members) get the target port
//!   straight away
//! - nothing flips until every pod reports it reached its previous goal
//! - then only the first differing process, by name, flips to the target
//!
//! While any process differs the service exposes both ports, the old one as
//! `mongodb` and the target as `mongodb-new`.

use replset_topology::{BuildError, Modifier, Process, Stage, TopologyDocument};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::Span;

/// Name of the primary service port
pub const MONGODB_PORT_NAME: &str = "mongodb";

/// Name of the transitional service port carrying the target port
pub const MONGODB_NEW_PORT_NAME: &str = "mongodb-new";

/// A named port exposed by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

impl ServicePort {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Observed state of one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodState {
    pub name: String,
    /// Pod object exists
    pub found: bool,
    /// Agent applied the live document version on this pod
    pub reached_goal_state: bool,
    pub is_arbiter: bool,
}

impl PodState {
    #[must_use]
    pub fn new(name: impl Into<String>, found: bool, reached_goal_state: bool) -> Self {
        Self {
            name: name.into(),
            found,
            reached_goal_state,
            is_arbiter: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn arbiter(mut self) -> Self {
        self.is_arbiter = true;
        self
    }
}

/// Pod group and ordinal of `{group}-{ordinal}`, so that `rs-10` follows `rs-2`
fn ordinal_key(name: &str) -> (&str, Option<u64>, &str) {
    match name.rsplit_once('-') {
        Some((group, ordinal)) => match ordinal.parse() {
            Ok(ordinal) => (group, Some(ordinal), name),
            Err(_) => (name, None, name),
        },
        None => (name, None, name),
    }
}

/// Ports computed for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPlan {
    /// Port each process uses this pass
    pub ports: BTreeMap<String, u16>,
    /// Some process was not on the target port when the pass started
    pub change_required: bool,
    /// A port still in use that differs from the target
    pub old_port: u16,
    /// Process flipped this pass, if any
    pub flipped: Option<String>,
}

/// Computes per-process ports and the service port set
#[derive(Debug, Clone)]
pub struct PortMigrationCoordinator {
    expected_port: u16,
    pod_states: Vec<PodState>,
    current_ports: BTreeMap<String, u16>,
    span: Span,
}

impl PortMigrationCoordinator {
    /// `processes` are the processes of the live topology document
    #[must_use]
    pub fn new(expected_port: u16, mut pod_states: Vec<PodState>, processes: &[Process]) -> Self {
        pod_states.sort_by(|a, b| ordinal_key(&a.name).cmp(&ordinal_key(&b.name)));
        let current_ports = processes
            .iter()
            .filter_map(|p| p.args.port().map(|port| (p.name.clone(), port)))
            .filter(|(_, port)| *port != 0)
            .collect();
        Self {
            expected_port,
            pod_states,
            current_ports,
            span: Span::none(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[inline]
    #[must_use]
    pub fn expected_port(&self) -> u16 {
        self.expected_port
    }

    /// Compute this pass's port assignment
    #[must_use]
    pub fn plan(&self) -> PortPlan {
        let mut ports: BTreeMap<String, u16> = self
            .pod_states
            .iter()
            .map(|pod| {
                let port = self
                    .current_ports
                    .get(&pod.name)
                    .copied()
                    .unwrap_or(self.expected_port);
                (pod.name.clone(), port)
            })
            .collect();

        let old_port = ports
            .values()
            .copied()
            .find(|port| *port != self.expected_port);
        let Some(old_port) = old_port else {
            tracing::debug!(parent: &self.span, port = self.expected_port, "no port change required");
            return PortPlan {
                ports,
                change_required: false,
                old_port: self.expected_port,
                flipped: None,
            };
        };

        if let Some(pod) = self.pod_states.iter().find(|p| !p.reached_goal_state) {
            tracing::debug!(
                parent: &self.span,
                pod = %pod.name,
                "port change required but not all pods reached goal state"
            );
            return PortPlan {
                ports,
                change_required: true,
                old_port,
                flipped: None,
            };
        }

        let flipped = self
            .pod_states
            .iter()
            .find(|pod| ports.get(&pod.name).is_some_and(|port| *port != self.expected_port))
            .map(|pod| pod.name.clone());
        if let Some(name) = &flipped {
            if let Some(port) = ports.get_mut(name) {
                tracing::debug!(
                    parent: &self.span,
                    process = %name,
                    from = *port,
                    to = self.expected_port,
                    "changing process port"
                );
                *port = self.expected_port;
            }
        }

        PortPlan {
            ports,
            change_required: true,
            old_port,
            flipped,
        }
    }

    /// Ports the service exposes for a plan
    #[must_use]
    pub fn service_ports(&self, plan: &PortPlan) -> Vec<ServicePort> {
        if !plan.change_required || plan.old_port == self.expected_port {
            return vec![ServicePort::new(MONGODB_PORT_NAME, self.expected_port)];
        }
        vec![
            ServicePort::new(MONGODB_NEW_PORT_NAME, self.expected_port),
            ServicePort::new(MONGODB_PORT_NAME, plan.old_port),
        ]
    }

    /// Ports the service should expose once this pass's plan is applied
    ///
    /// Collapses to a single port as soon as the flip made every process
    /// match the target.
    #[must_use]
    pub fn settled_service_ports(&self, plan: &PortPlan) -> Vec<ServicePort> {
        let settled = PortPlan {
            ports: plan.ports.clone(),
            change_required: plan.ports.values().any(|p| *p != self.expected_port),
            old_port: plan
                .ports
                .values()
                .copied()
                .find(|p| *p != self.expected_port)
                .unwrap_or(self.expected_port),
            flipped: None,
        };
        self.service_ports(&settled)
    }

    /// Ports the service should expose for the processes as they are now
    ///
    /// Unlike [`Self::plan`] this never flips anything; it reflects the live
    /// document after the last persisted change.
    #[must_use]
    pub fn current_service_ports(&self) -> Vec<ServicePort> {
        let ports = self
            .pod_states
            .iter()
            .map(|pod| {
                let port = self
                    .current_ports
                    .get(&pod.name)
                    .copied()
                    .unwrap_or(self.expected_port);
                (pod.name.clone(), port)
            })
            .collect();
        self.settled_service_ports(&PortPlan {
            ports,
            change_required: false,
            old_port: self.expected_port,
            flipped: None,
        })
    }

    /// Document modifier applying a plan
    #[must_use]
    pub fn modifier(&self, plan: &PortPlan) -> PortsModifier {
        PortsModifier {
            ports: plan.ports.clone(),
            default_port: self.expected_port,
        }
    }
}

/// Sets the port of every process from a [`PortPlan`]
///
/// Processes the plan does not know about get the target port.
#[derive(Debug, Clone)]
pub struct PortsModifier {
    ports: BTreeMap<String, u16>,
    default_port: u16,
}

impl Modifier for PortsModifier {
    fn stage(&self) -> Stage {
        Stage::Ports
    }

    fn name(&self) -> &str {
        "ports"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        for process in &mut doc.processes {
            let port = self
                .ports
                .get(&process.name)
                .copied()
                .unwrap_or(self.default_port);
            process.args.set_port(port);
        }
        Ok(())
    }
}
