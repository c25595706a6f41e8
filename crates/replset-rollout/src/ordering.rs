//! Deploy ordering policy
//!
//! Decides whether the topology document or the runtime objects are updated
//! first on this pass.

/// Observed facts the decision depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderingInputs {
    pub has_existing_runtime_objects: bool,
    pub is_scaling_up: bool,
    pub is_scaling_down: bool,
    pub is_changing_version: bool,
    pub tls_newly_enabling: bool,
}

/// Rule that produced a decision, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingRule {
    /// New certificate mounts must exist before the document requires TLS
    TlsEnabling,
    /// New members must exist before the document references them
    ScalingUp,
    /// The document drops a member before its pod goes away
    ScalingDown,
    /// Binaries change before the document asserts the new version
    VersionChange,
    Default,
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingDecision {
    pub topology_first: bool,
    pub rule: OrderingRule,
}

/// Apply the ordering rules
#[must_use]
pub const fn decide(inputs: &OrderingInputs) -> OrderingDecision {
    let (topology_first, rule) = if inputs.has_existing_runtime_objects && inputs.tls_newly_enabling {
        (false, OrderingRule::TlsEnabling)
    } else if inputs.is_scaling_up {
        (false, OrderingRule::ScalingUp)
    } else if inputs.is_scaling_down {
        (true, OrderingRule::ScalingDown)
    } else if inputs.is_changing_version {
        (false, OrderingRule::VersionChange)
    } else {
        (true, OrderingRule::Default)
    };
    OrderingDecision {
        topology_first,
        rule,
    }
}

/// `true` when the topology document goes first
#[inline]
#[must_use]
pub const fn should_deploy_topology_first(inputs: &OrderingInputs) -> bool {
    decide(inputs).topology_first
}
