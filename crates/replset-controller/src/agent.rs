//! Goal state of the agents
//!
//! In headless mode each agent annotates its pod with the topology document
//! version it last applied. A pod has reached goal state when that version
//! equals the live document version. Pods that do not exist yet have nothing
//! to wait for and count as reached.

use crate::error::StoreError;
use crate::resource::ReplicaSet;
use crate::store::{get_optional, Cluster};
use replset_rollout::PodState;
use tracing::Span;

/// Pod annotation written by the agent
pub const AGENT_VERSION_ANNOTATION: &str = "agent.mongodb.com/version";

/// Process (and pod) names for a member and arbiter count
#[must_use]
pub fn process_names(resource: &ReplicaSet, members: u32, arbiters: u32) -> Vec<(String, bool)> {
    let data = (0..members).map(|i| (format!("{}-{i}", resource.name()), false));
    let arbiter = (0..arbiters).map(|i| (format!("{}-{i}", resource.arbiters_stateful_set_name()), true));
    data.chain(arbiter).collect()
}

/// Observed goal state of every pod backing `members` and `arbiters`
///
/// # Errors
/// Store failures
pub async fn pod_states(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    members: u32,
    arbiters: u32,
    version: u64,
) -> Result<Vec<PodState>, StoreError> {
    let mut states = Vec::new();
    for (name, is_arbiter) in process_names(resource, members, arbiters) {
        let pod = get_optional(cluster.pods(), &resource.key_of(&name)).await?;
        let reached = pod.as_ref().map_or(true, |pod| {
            pod.meta
                .annotation(AGENT_VERSION_ANNOTATION)
                .and_then(|v| v.parse::<u64>().ok())
                == Some(version)
        });
        let state = PodState::new(name, pod.is_some(), reached);
        states.push(if is_arbiter { state.arbiter() } else { state });
    }
    Ok(states)
}

/// Every pod reached goal state; logs the first one that has not
#[must_use]
pub fn all_reached_goal_state(states: &[PodState], span: &Span) -> bool {
    match states.iter().find(|s| !s.reached_goal_state) {
        Some(pending) => {
            tracing::debug!(parent: span, pod = %pending.name, "agent has not reached goal state yet");
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ReplicaSetSpec;

    #[test]
    fn arbiter_names_follow_their_pod_group() {
        let rs = ReplicaSet::new("ns", "rs", ReplicaSetSpec::default());
        assert_eq!(
            process_names(&rs, 2, 1),
            vec![
                ("rs-0".to_string(), false),
                ("rs-1".to_string(), false),
                ("rs-arb-0".to_string(), true)
            ]
        );
    }

    #[test]
    fn goal_state_needs_every_pod() {
        let span = Span::none();
        let states = vec![PodState::new("a", true, true), PodState::new("b", true, false)];
        assert!(!all_reached_goal_state(&states, &span));
        assert!(all_reached_goal_state(&states[..1], &span));
        assert!(all_reached_goal_state(&[], &span));
    }
}
