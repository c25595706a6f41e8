//! Transition guards
//!
//! A guard is a pure predicate over the observed context and the current
//! record. Guards are re-evaluated on every pass.

use crate::record::StateRecord;
use std::fmt;
use std::sync::Arc;

type Predicate<C> = dyn Fn(&C, &StateRecord) -> bool + Send + Sync;

/// Predicate deciding whether a transition may be taken
pub struct Guard<C> {
    predicate: Arc<Predicate<C>>,
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}

impl<C: 'static> Guard<C> {
    /// Guard over the context only
    pub fn new(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(move |ctx, _| f(ctx)),
        }
    }

    /// Guard that also sees the record
    pub fn with_record(f: impl Fn(&C, &StateRecord) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(f),
        }
    }

    /// Unconditional transition
    #[must_use]
    pub fn always() -> Self {
        Self::from_bool(true)
    }

    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        Self::with_record(move |_, _| value)
    }

    /// True while `step` has not completed in this attempt
    pub fn not_visited(step: impl Into<String>) -> Self {
        let step = step.into();
        Self::with_record(move |_, record| !record.contains(&step))
    }

    /// Both guards hold
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::with_record(move |ctx, record| {
            (self.predicate)(ctx, record) && (other.predicate)(ctx, record)
        })
    }

    /// Negation
    #[must_use]
    pub fn negate(self) -> Self {
        Self::with_record(move |ctx, record| !(self.predicate)(ctx, record))
    }

    #[inline]
    #[must_use]
    pub fn evaluate(&self, ctx: &C, record: &StateRecord) -> bool {
        (self.predicate)(ctx, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinators() {
        let record = StateRecord::start("Start");
        let yes = Guard::<u32>::new(|n| *n > 1);
        assert!(yes.evaluate(&2, &record));
        assert!(!yes.clone().negate().evaluate(&2, &record));
        assert!(!yes.and(Guard::from_bool(false)).evaluate(&2, &record));
        assert!(!Guard::<u32>::not_visited("Start").evaluate(&0, &record));
        assert!(Guard::<u32>::not_visited("Other").evaluate(&0, &record));
        assert!(Guard::<u32>::always().evaluate(&0, &record));
    }
}
