//! Testing utilities for the replset workspace
//!
//! - [`MemoryCluster`]: optimistic-concurrency object stores in memory
//! - [`ClusterSimulator`]: pod groups become ready, agents apply documents
//! - [`fixtures`]: resources, secrets and a convergence driver

#![allow(missing_docs)]

pub mod fixtures;
mod memory;
mod simulator;

pub use fixtures::{converge, harness, seed, Convergence};
pub use memory::{MemoryCluster, MemoryStore};
pub use simulator::{ClusterSimulator, POD_GROUP_LABEL};

/// Route `tracing` output to the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
