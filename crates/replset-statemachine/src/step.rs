//! Steps and their outcomes

use std::time::Duration;

/// When the caller should invoke the machine again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Run the next step right away
    Immediate,
    /// Come back after a delay
    After(Duration),
    /// Nothing to do until something changes
    Never,
}

/// Result of running one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub requeue: Requeue,
    /// The step finished; the machine moves past it
    pub completed: bool,
}

impl StepOutcome {
    /// Done, continue immediately
    #[inline]
    #[must_use]
    pub const fn complete() -> Self {
        Self {
            requeue: Requeue::Immediate,
            completed: true,
        }
    }

    /// Done with an explicit requeue hint
    #[inline]
    #[must_use]
    pub const fn complete_with(requeue: Requeue) -> Self {
        Self {
            requeue,
            completed: true,
        }
    }

    /// Not done, run the same step again after `delay`
    #[inline]
    #[must_use]
    pub const fn retry_after(delay: Duration) -> Self {
        Self {
            requeue: Requeue::After(delay),
            completed: false,
        }
    }

    /// Not done and nothing will change without outside input
    #[inline]
    #[must_use]
    pub const fn halt() -> Self {
        Self {
            requeue: Requeue::Never,
            completed: false,
        }
    }

    /// The step stopped short and will not be retried on its own
    #[inline]
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        !self.completed && matches!(self.requeue, Requeue::Never)
    }
}

/// A named unit of reconciliation work
#[async_trait::async_trait]
pub trait Step<C: Send, E>: Send + Sync {
    fn name(&self) -> &str;

    /// Do the work of this step
    ///
    /// # Errors
    /// Any error aborts the pass
    async fn reconcile(&self, ctx: &mut C) -> Result<StepOutcome, E>;
}

/// Step that does nothing and completes
#[derive(Debug, Clone)]
pub struct NoopStep {
    name: String,
    requeue: Requeue,
}

impl NoopStep {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requeue: Requeue::Never,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_requeue(mut self, requeue: Requeue) -> Self {
        self.requeue = requeue;
        self
    }
}

#[async_trait::async_trait]
impl<C: Send, E> Step<C, E> for NoopStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self, _ctx: &mut C) -> Result<StepOutcome, E> {
        Ok(StepOutcome::complete_with(self.requeue))
    }
}
