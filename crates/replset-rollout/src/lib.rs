//! Incremental migration coordinators
//!
//! Pure decision logic for changes that must happen one step at a time:
//!
//! - [`scaling`]: next replica count, one member per pass
//! - [`ports`]: per-process port cutover with a dual-port service window
//! - [`tls`]: certificate validation, content-hash naming and staged enablement
//! - [`ordering`]: whether the topology document or runtime objects go first
//!
//! None of these touch storage; callers feed them observed state.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod ordering;
pub mod ports;
pub mod scaling;
pub mod tls;

pub use ordering::{decide, should_deploy_topology_first, OrderingDecision, OrderingInputs, OrderingRule};
pub use ports::{
    PodState, PortMigrationCoordinator, PortPlan, PortsModifier, ServicePort, MONGODB_NEW_PORT_NAME,
    MONGODB_PORT_NAME,
};
pub use scaling::{
    is_scaling_down, is_scaling_up, is_still_scaling, next_replicas, replicas_this_pass, ReplicaCounts,
    Scaler,
};
pub use tls::{HashedPem, TlsError, TlsMaterial, TlsModifier, TlsPhase, ROLLED_OUT_ANNOTATION};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
