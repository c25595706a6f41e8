//! The reconciliation state machine
//!
//! A directed graph of named steps. Each call to [`Machine::reconcile`]:
//!
//! 1. loads the record (a fresh start record when none exists, or when the
//!    previous attempt already reached a terminal step)
//! 2. evaluates the outgoing transitions of the current step in
//!    registration order and moves to the first target whose guard holds
//! 3. runs exactly that one step
//! 4. on completion appends the step to the history and persists the record
//!
//! Errors abort the pass without touching the record; callers are expected
//! to [`Machine::reset`] afterwards.

use crate::guard::Guard;
use crate::record::{CycleDetected, StateRecord};
use crate::step::{Step, StepOutcome};
use crate::store::{RecordStore, RecordStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Span;

/// Errors surfaced by [`Machine::reconcile`]
#[derive(Debug, thiserror::Error)]
pub enum MachineError<E> {
    /// The step itself failed
    #[error("step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: E,
    },

    #[error(transparent)]
    Cycle(#[from] CycleDetected),

    #[error("record store: {0}")]
    Store(#[from] RecordStoreError),

    /// The record names a step that was never registered
    #[error("unknown step {0}")]
    UnknownStep(String),

    /// No guard of a non-terminal step held
    #[error("no transition available from step {0}")]
    NoTransition(String),
}

impl<E> MachineError<E> {
    #[inline]
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle(_))
    }

    /// Step error, if that is what this is
    #[inline]
    #[must_use]
    pub fn step_error(&self) -> Option<&E> {
        match self {
            Self::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

struct Transition<C> {
    to: String,
    guard: Guard<C>,
}

/// A graph of steps over context `C` whose steps fail with `E`
pub struct Machine<C, E> {
    start: String,
    steps: HashMap<String, Arc<dyn Step<C, E>>>,
    transitions: HashMap<String, Vec<Transition<C>>>,
    store: Arc<dyn RecordStore>,
    span: Span,
}

impl<C, E> Machine<C, E>
where
    C: Send + 'static,
    E: Send + 'static,
{
    /// New machine whose attempts begin at `start`
    pub fn new(start: impl Step<C, E> + 'static, store: Arc<dyn RecordStore>) -> Self {
        let start: Arc<dyn Step<C, E>> = Arc::new(start);
        let name = start.name().to_string();
        Self {
            steps: HashMap::from([(name.clone(), start)]),
            start: name,
            transitions: HashMap::new(),
            store,
            span: Span::none(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Register a step; a later registration with the same name replaces it
    pub fn add_step(&mut self, step: impl Step<C, E> + 'static) -> &mut Self {
        self.steps.insert(step.name().to_string(), Arc::new(step));
        self
    }

    /// Edge `from -> to` taken when `guard` holds
    pub fn add_transition(&mut self, from: &str, to: &str, guard: Guard<C>) -> &mut Self {
        self.transitions
            .entry(from.to_string())
            .or_default()
            .push(Transition {
                to: to.to_string(),
                guard,
            });
        self
    }

    /// Unconditional edge
    pub fn add_direct_transition(&mut self, from: &str, to: &str) -> &mut Self {
        self.add_transition(from, to, Guard::always())
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Targets of `from` in registration order
    #[must_use]
    pub fn targets(&self, from: &str) -> Vec<&str> {
        self.transitions
            .get(from)
            .map(|ts| ts.iter().map(|t| t.to.as_str()).collect())
            .unwrap_or_default()
    }

    /// A step without outgoing transitions
    #[must_use]
    pub fn is_terminal(&self, step: &str) -> bool {
        self.transitions.get(step).map_or(true, Vec::is_empty)
    }

    /// Step the next pass would run for `record`, without running it
    #[must_use]
    pub fn next_step(&self, ctx: &C, record: &StateRecord) -> Option<&str> {
        self.transitions
            .get(record.current())?
            .iter()
            .find(|t| t.guard.evaluate(ctx, record))
            .map(|t| t.to.as_str())
    }

    /// Run one step
    ///
    /// # Errors
    /// - [`MachineError::Step`] when the step fails
    /// - [`MachineError::Cycle`] when the chosen step already completed in
    ///   this attempt; the step is not run
    /// - [`MachineError::Store`] when the record cannot be loaded or saved
    pub async fn reconcile(&self, ctx: &mut C) -> Result<StepOutcome, MachineError<E>> {
        let mut record = match self.store.load().await? {
            Some(record) => record,
            None => StateRecord::start(&self.start),
        };
        if !self.steps.contains_key(record.current()) {
            return Err(MachineError::UnknownStep(record.current().to_string()));
        }
        if self.is_terminal(record.current()) {
            tracing::debug!(parent: &self.span, last = %record.current(), "starting new convergence attempt");
            record = StateRecord::start(&self.start);
        }

        let Some(next) = self.next_step(ctx, &record) else {
            return Err(MachineError::NoTransition(record.current().to_string()));
        };
        let next = next.to_string();
        if record.contains(&next) {
            return Err(CycleDetected {
                step: next,
                history: record.state_history,
            }
            .into());
        }
        let step = self
            .steps
            .get(&next)
            .ok_or_else(|| MachineError::UnknownStep(next.clone()))?;

        tracing::debug!(parent: &self.span, from = %record.current(), to = %next, "reconciling step");
        let outcome = step
            .reconcile(ctx)
            .await
            .map_err(|source| MachineError::Step {
                step: next.clone(),
                source,
            })?;

        if outcome.completed {
            record.complete(&next)?;
            self.store.save(&record).await?;
            tracing::debug!(parent: &self.span, step = %next, "step completed");
        } else {
            tracing::debug!(parent: &self.span, step = %next, requeue = ?outcome.requeue, "step not yet complete");
        }
        Ok(outcome)
    }

    /// Discard history and position the record on the start step
    ///
    /// # Errors
    /// [`MachineError::Store`] if the record cannot be saved
    pub async fn reset(&self) -> Result<(), MachineError<E>> {
        tracing::debug!(parent: &self.span, start = %self.start, "resetting state record");
        self.store.save(&StateRecord::start(&self.start)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{NoopStep, Requeue};
    use crate::store::InMemoryRecordStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Default)]
    struct Ctx {
        ran: Vec<String>,
        tls: bool,
        ready: bool,
    }

    struct Recording {
        name: &'static str,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Step<Ctx, String> for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn reconcile(&self, ctx: &mut Ctx) -> Result<StepOutcome, String> {
            ctx.ran.push(self.name.to_string());
            if self.fail {
                return Err(format!("{} failed", self.name));
            }
            if self.name == "Deploy" && !ctx.ready {
                return Ok(StepOutcome::retry_after(Duration::from_secs(10)));
            }
            Ok(StepOutcome::complete())
        }
    }

    fn step(name: &'static str) -> Recording {
        Recording { name, fail: false }
    }

    fn machine(store: Arc<InMemoryRecordStore>) -> Machine<Ctx, String> {
        let mut m = Machine::new(NoopStep::new("Start"), store);
        m.add_step(step("Validate"))
            .add_step(step("Tls"))
            .add_step(step("Deploy"))
            .add_step(NoopStep::new("End"));
        m.add_direct_transition("Start", "Validate")
            .add_transition("Validate", "Tls", Guard::new(|c: &Ctx| c.tls))
            .add_direct_transition("Validate", "Deploy")
            .add_direct_transition("Tls", "Deploy")
            .add_direct_transition("Deploy", "End");
        m
    }

    async fn run_to_end(m: &Machine<Ctx, String>, ctx: &mut Ctx) {
        for _ in 0..10 {
            let outcome = m.reconcile(ctx).await.unwrap();
            if outcome.requeue == Requeue::Never {
                return;
            }
        }
        panic!("did not reach End");
    }

    #[test]
    fn only_an_unfinished_never_is_halted() {
        assert!(StepOutcome::halt().is_halted());
        assert!(!StepOutcome::complete_with(Requeue::Never).is_halted());
        assert!(!StepOutcome::retry_after(Duration::from_secs(1)).is_halted());
        assert!(!StepOutcome::complete().is_halted());
    }

    #[tokio::test]
    async fn walks_direct_path() {
        let store = Arc::new(InMemoryRecordStore::new());
        let m = machine(store.clone());
        let mut ctx = Ctx {
            ready: true,
            ..Ctx::default()
        };
        run_to_end(&m, &mut ctx).await;
        assert_eq!(ctx.ran, vec!["Validate", "Deploy"]);
        assert_eq!(
            store.current().unwrap().state_history,
            vec!["Start", "Validate", "Deploy", "End"]
        );
    }

    #[tokio::test]
    async fn guards_are_evaluated_each_pass() {
        let store = Arc::new(InMemoryRecordStore::new());
        let m = machine(store);
        let mut ctx = Ctx {
            ready: true,
            ..Ctx::default()
        };
        m.reconcile(&mut ctx).await.unwrap();
        ctx.tls = true;
        run_to_end(&m, &mut ctx).await;
        assert_eq!(ctx.ran, vec!["Validate", "Tls", "Deploy"]);
    }

    #[tokio::test]
    async fn incomplete_step_runs_again() {
        let store = Arc::new(InMemoryRecordStore::new());
        let m = machine(store.clone());
        let mut ctx = Ctx::default();
        m.reconcile(&mut ctx).await.unwrap();
        let outcome = m.reconcile(&mut ctx).await.unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.requeue, Requeue::After(Duration::from_secs(10)));
        assert_eq!(store.current().unwrap().current(), "Validate");

        ctx.ready = true;
        assert!(m.reconcile(&mut ctx).await.unwrap().completed);
        assert_eq!(ctx.ran, vec!["Validate", "Deploy", "Deploy"]);
    }

    #[tokio::test]
    async fn terminal_record_starts_new_attempt() {
        let store = Arc::new(InMemoryRecordStore::new());
        let m = machine(store.clone());
        let mut ctx = Ctx {
            ready: true,
            ..Ctx::default()
        };
        run_to_end(&m, &mut ctx).await;
        m.reconcile(&mut ctx).await.unwrap();
        assert_eq!(store.current().unwrap().state_history, vec!["Start", "Validate"]);
    }

    #[tokio::test]
    async fn step_error_leaves_record_untouched() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut m = machine(store.clone());
        m.add_step(Recording {
            name: "Deploy",
            fail: true,
        });
        let mut ctx = Ctx::default();
        m.reconcile(&mut ctx).await.unwrap();
        let err = m.reconcile(&mut ctx).await.unwrap_err();
        assert_eq!(err.step_error().map(String::as_str), Some("Deploy failed"));
        assert_eq!(store.current().unwrap().current(), "Validate");

        m.reset().await.unwrap();
        assert_eq!(store.current().unwrap(), StateRecord::start("Start"));
    }

    #[tokio::test]
    async fn cycles_are_detected_before_running() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut m = Machine::new(NoopStep::new("Start"), store.clone());
        m.add_step(step("A")).add_step(step("B"));
        m.add_direct_transition("Start", "A")
            .add_direct_transition("A", "B")
            .add_direct_transition("B", "A");
        let mut ctx = Ctx::default();
        m.reconcile(&mut ctx).await.unwrap();
        m.reconcile(&mut ctx).await.unwrap();
        let err = m.reconcile(&mut ctx).await.unwrap_err();
        assert!(err.is_cycle());
        assert_eq!(ctx.ran, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn unknown_recorded_step_is_an_error() {
        let mut record = StateRecord::start("Start");
        record.complete("Gone").unwrap();
        let store = Arc::new(InMemoryRecordStore::with_record(record));
        let m = machine(store);
        let err = m.reconcile(&mut Ctx::default()).await.unwrap_err();
        assert!(matches!(err, MachineError::UnknownStep(s) if s == "Gone"));
    }

    #[tokio::test]
    async fn no_open_guard_is_an_error() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut m = Machine::<Ctx, String>::new(NoopStep::new("Start"), store);
        m.add_step(step("A"));
        m.add_transition("Start", "A", Guard::from_bool(false));
        let err = m.reconcile(&mut Ctx::default()).await.unwrap_err();
        assert!(matches!(err, MachineError::NoTransition(s) if s == "Start"));
    }

    #[test]
    fn targets_keep_registration_order() {
        let m = machine(Arc::new(InMemoryRecordStore::new()));
        assert_eq!(m.targets("Validate"), vec!["Tls", "Deploy"]);
        assert!(m.is_terminal("End"));
        assert!(!m.is_terminal("Start"));
    }
}
