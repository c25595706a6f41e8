//! Replica-set reconciler
//!
//! Converges a declared replica set onto a cluster one step at a time:
//! - Validates the spec against the last accepted one
//! - Maintains the headless service, pod groups and credential secrets
//! - Builds and persists the topology document the agents execute
//! - Waits on pod readiness and agent goal state between steps
//! - Reports progress on the resource status
//!
//! Storage is reached only through the [`Cluster`] seam, so hosts can back it
//! with a real API client or an in-memory store.
//!
//! # Example
//!
//! ```rust,ignore
//! use replset_controller::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(cluster: Arc<dyn Cluster>) -> Result<(), ReconcileError> {
//! let reconciler = Reconciler::new(cluster, OperatorConfig::new());
//! let key = ObjectKey::new("default", "my-replica-set");
//! match reconciler.reconcile(&key).await? {
//!     Requeue::Immediate => { /* call again */ }
//!     Requeue::After(delay) => { /* schedule after delay */ }
//!     Requeue::Never => {}
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent;
pub mod config;
pub mod construct;
pub mod context;
pub mod error;
pub mod metrics;
pub mod objects;
pub mod reconciler;
pub mod record_store;
pub mod resource;
pub mod status;
pub mod steps;
pub mod store;
pub mod telemetry;
pub mod tls;
pub mod topology;
pub mod users;
pub mod validation;

pub use config::OperatorConfig;
pub use context::ReconcileContext;
pub use error::{CredentialError, ReconcileError, StoreError, ValidationError};
pub use objects::{ConfigMap, Object, ObjectKey, ObjectMeta, Pod, Secret, Service, StatefulSet};
pub use reconciler::Reconciler;
pub use record_store::AnnotationRecordStore;
pub use resource::{Phase, ReplicaSet, ReplicaSetSpec, ReplicaSetStatus, UserSpec};
pub use status::StatusOptions;
pub use store::{Cluster, ObjectStore};
pub use users::{CredentialDeriver, Credentials, ScramSha256};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosting the reconciler
    pub use crate::{
        Cluster, ObjectKey, ObjectStore, OperatorConfig, Phase, ReconcileError, Reconciler, ReplicaSet,
        ReplicaSetSpec,
    };
    pub use replset_statemachine::Requeue;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
