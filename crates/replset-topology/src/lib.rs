//! Replica-set topology document
//!
//! The versioned configuration artifact an external automation agent reads
//! to drive the database processes.
//!
//! # Core Concepts
//!
//! - [`TopologyDocument`]: processes, replica set, auth, TLS, roles, metrics
//! - [`TopologyBuilder`]: rebuilds the document from scratch and diffs it
//!   against the persisted copy; the version moves only on change
//! - [`Modifier`]: a field-level change applied at a fixed [`Stage`]
//! - [`ContentHash`]: SHA-256 digest used to name materialized files
//!
//! # Example
//!
//! ```rust
//! use replset_topology::TopologyBuilder;
//!
//! let doc = TopologyBuilder::new("rs", "default")
//!     .with_members(3)
//!     .with_mongodb_version("6.0.5")
//!     .build()
//!     .unwrap();
//! assert_eq!(doc.version, 1);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod auth;
mod builder;
mod document;
mod error;
mod hash;
pub mod modifiers;
mod process;
mod roles;

pub use auth::{AgentUser, Auth, ScramCreds, SCRAM_SHA_1, SCRAM_SHA_256};
pub use builder::{
    major_minor, FnModifier, Modifier, Stage, TopologyBuilder, DEFAULT_CLUSTER_DOMAIN,
};
pub use document::{
    ClientCertificateMode, Prometheus, ReplicaSetConfig, ReplicaSetMember, TlsSettings,
    TopologyDocument, PROTOCOL_VERSION,
};
pub use error::BuildError;
pub use hash::{ContentHash, HashError};
pub use process::{
    Process, ProcessArgs, ProcessType, SystemLog, TlsMode, AUTH_SCHEMA_VERSION, DEFAULT_DB_PATH,
    DEFAULT_PORT,
};
pub use roles::{AuthenticationRestriction, CustomRole, Privilege, Resource, RoleRef};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
