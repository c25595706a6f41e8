//! Scaling coordinator
//!
//! Membership changes move one member at a time once a deployment exists;
//! only the initial creation jumps straight to the desired count.

/// Something with a desired and a realized replica count
pub trait Scaler {
    fn desired_replicas(&self) -> u32;
    fn current_replicas(&self) -> u32;

    /// Scale one member at a time even from zero
    fn force_individual_scaling(&self) -> bool {
        false
    }
}

/// Replica count to apply on this pass
///
/// - `current == desired`: `desired`
/// - `current == 0` and not forced: `desired`
/// - otherwise one unit toward `desired`
#[must_use]
pub const fn next_replicas(desired: u32, current: u32, force_individual: bool) -> u32 {
    if current == desired || (current == 0 && !force_individual) {
        return desired;
    }
    if desired < current {
        current - 1
    } else {
        current + 1
    }
}

/// [`next_replicas`] for a [`Scaler`]
#[inline]
#[must_use]
pub fn replicas_this_pass(scaler: &impl Scaler) -> u32 {
    next_replicas(
        scaler.desired_replicas(),
        scaler.current_replicas(),
        scaler.force_individual_scaling(),
    )
}

/// Growing an existing deployment
#[inline]
#[must_use]
pub fn is_scaling_up(scaler: &impl Scaler) -> bool {
    scaler.desired_replicas() > scaler.current_replicas() && scaler.current_replicas() != 0
}

#[inline]
#[must_use]
pub fn is_scaling_down(scaler: &impl Scaler) -> bool {
    scaler.desired_replicas() < scaler.current_replicas()
}

/// More passes are needed after this one
#[inline]
#[must_use]
pub fn is_still_scaling(scaler: &impl Scaler) -> bool {
    replicas_this_pass(scaler) != scaler.desired_replicas()
}

/// Plain desired/current pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub desired: u32,
    pub current: u32,
    pub force_individual: bool,
}

impl ReplicaCounts {
    #[inline]
    #[must_use]
    pub const fn new(desired: u32, current: u32) -> Self {
        Self {
            desired,
            current,
            force_individual: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force_individual = true;
        self
    }
}

impl Scaler for ReplicaCounts {
    fn desired_replicas(&self) -> u32 {
        self.desired
    }

    fn current_replicas(&self) -> u32 {
        self.current
    }

    fn force_individual_scaling(&self) -> bool {
        self.force_individual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn initial_creation_jumps() {
        assert_eq!(next_replicas(5, 0, false), 5);
        assert_eq!(next_replicas(5, 0, true), 1);
    }

    #[test]
    fn one_step_at_a_time() {
        assert_eq!(next_replicas(5, 3, false), 4);
        assert_eq!(next_replicas(5, 4, false), 5);
        assert_eq!(next_replicas(1, 3, false), 2);
        assert_eq!(next_replicas(0, 2, false), 1);
    }

    #[test]
    fn scaling_predicates() {
        let fresh = ReplicaCounts::new(3, 0);
        assert!(!is_scaling_up(&fresh));
        assert!(!is_still_scaling(&fresh));

        let up = ReplicaCounts::new(5, 3);
        assert!(is_scaling_up(&up));
        assert!(!is_scaling_down(&up));
        assert!(is_still_scaling(&up));
        assert_eq!(replicas_this_pass(&up), 4);

        let last = ReplicaCounts::new(5, 4);
        assert!(!is_still_scaling(&last));

        let down = ReplicaCounts::new(3, 5);
        assert!(is_scaling_down(&down));
        assert_eq!(replicas_this_pass(&down.forced()), 4);
    }

    proptest! {
        #[test]
        fn moves_at_most_one_unless_fresh(desired in 0u32..50, current in 0u32..50) {
            let next = next_replicas(desired, current, false);
            if current == 0 {
                prop_assert_eq!(next, desired);
            } else {
                prop_assert!(next.abs_diff(current) <= 1);
            }
            prop_assert_eq!(next_replicas(desired, desired, false), desired);
        }

        #[test]
        fn always_converges(desired in 0u32..30, current in 0u32..30, forced in any::<bool>()) {
            let mut c = current;
            for _ in 0..=60 {
                c = next_replicas(desired, c, forced);
            }
            prop_assert_eq!(c, desired);
        }
    }
}
