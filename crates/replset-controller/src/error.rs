//! Error types for the controller
//!
//! Errors are grouped by how the reconciler reacts to them:
//! - transient conflicts on persisted state ([`ReconcileError::is_conflict`])
//! - failures worth retrying later ([`ReconcileError::is_retryable`])
//! - failures that need a corrected spec ([`ReconcileError::is_terminal`])
//!
//! Not-yet-ready conditions are not errors at all; steps report them as
//! incomplete outcomes.

use crate::objects::ObjectKey;
use replset_rollout::TlsError;
use replset_statemachine::{CycleDetected, MachineError, RecordStoreError};
use replset_topology::BuildError;

/// Message fragment of every optimistic concurrency failure
pub const CONFLICT_MESSAGE: &str = "the object has been modified";

/// Failures of the object store seam
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// Stale `resource_version` on update
    #[error("operation on {kind} {key} failed: the object has been modified; please apply your changes to the latest version and try again")]
    Conflict { kind: &'static str, key: ObjectKey },

    #[error("object store failure: {0}")]
    Backend(String),
}

impl StoreError {
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for RecordStoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => Self::Conflict(e.to_string()),
            StoreError::NotFound { .. } => Self::NotFound(e.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Illegal spec or spec transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("number of arbiters specified ({arbiters}) is greater or equal than the number of members in the replicaset ({members}). At least one member must not be an arbiter")]
    TooManyArbiters { arbiters: i32, members: u32 },

    #[error("number of arbiters must be greater or equal than 0, got {0}")]
    NegativeArbiters(i32),

    #[error("authentication mode {0} is specified more than once")]
    DuplicateAuthMode(String),

    #[error("user {user} is missing {field}")]
    MissingUserField { user: String, field: &'static str },

    #[error("users {first} and {second} share the {kind} secret {secret}")]
    SharedSecret {
        kind: &'static str,
        secret: String,
        first: String,
        second: String,
    },

    #[error("TLS can't be set to disabled after it has been enabled")]
    TlsDisabled,

    #[error("additional mongod configuration is invalid: {0}")]
    AdditionalConfig(String),
}

/// Credential material problems
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Neither the password nor previously derived credentials exist
    #[error("password secret {secret} (key {key}) not found for user {user}")]
    PasswordNotFound {
        user: String,
        secret: String,
        key: String,
    },

    #[error("no credential deriver registered for mechanism {0}")]
    UnsupportedMechanism(String),

    #[error("credential derivation failed: {0}")]
    Derivation(String),
}

/// Everything that can abort a reconciliation pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error validating new spec: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not build topology document: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("TLS configuration is not valid: {0}")]
    Tls(#[from] TlsError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),

    #[error(transparent)]
    Cycle(#[from] CycleDetected),

    /// Step graph misconfiguration
    #[error("state machine: {0}")]
    StateMachine(String),
}

impl ReconcileError {
    /// Optimistic concurrency failure on persisted state
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Store(e) => e.is_conflict(),
            Self::RecordStore(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Worth another pass without a spec change
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(_) | Self::RecordStore(_) | Self::Tls(_) => true,
            Self::Build(e) => e.is_retryable(),
            Self::Credentials(e) => matches!(e, CredentialError::PasswordNotFound { .. }),
            _ => false,
        }
    }

    /// Needs a corrected spec
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Cycle(_) | Self::StateMachine(_) | Self::Serialization(_) => true,
            Self::Build(e) => e.is_terminal(),
            Self::Credentials(e) => !matches!(e, CredentialError::PasswordNotFound { .. }),
            _ => false,
        }
    }
}

impl From<MachineError<ReconcileError>> for ReconcileError {
    fn from(e: MachineError<ReconcileError>) -> Self {
        match e {
            MachineError::Step { source, .. } => source,
            MachineError::Cycle(c) => Self::Cycle(c),
            MachineError::Store(s) => Self::RecordStore(s),
            MachineError::UnknownStep(step) => Self::StateMachine(format!("unknown step {step}")),
            MachineError::NoTransition(step) => {
                Self::StateMachine(format!("no transition available from step {step}"))
            }
        }
    }
}

/// Messages that should never reach the status field
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    message.contains(CONFLICT_MESSAGE)
}
