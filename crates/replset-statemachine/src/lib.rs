//! Persisted reconciliation state machine
//!
//! Sequences convergence steps across invocations:
//!
//! - [`Machine`]: explicit table of `(from, to, guard)` transitions, one step
//!   per call
//! - [`StateRecord`]: current step, per-attempt history and completion flags
//! - [`RecordStore`]: where the record lives, usually on the owning resource
//! - [`retry`]: bounded fixed-backoff retry for optimistic-concurrency writes
//!
//! # Example
//!
//! ```rust
//! use replset_statemachine::{InMemoryRecordStore, Machine, NoopStep};
//! use std::sync::Arc;
//!
//! let mut machine: Machine<(), std::io::Error> =
//!     Machine::new(NoopStep::new("Start"), Arc::new(InMemoryRecordStore::new()));
//! machine.add_step(NoopStep::new("End"));
//! machine.add_direct_transition("Start", "End");
//! assert!(machine.is_terminal("End"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod guard;
mod machine;
mod record;
pub mod retry;
mod step;
mod store;

pub use guard::Guard;
pub use machine::{Machine, MachineError};
pub use record::{CycleDetected, StateRecord};
pub use retry::{retry, RetryPolicy};
pub use step::{NoopStep, Requeue, Step, StepOutcome};
pub use store::{InMemoryRecordStore, RecordStore, RecordStoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
