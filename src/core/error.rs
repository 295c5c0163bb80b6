//! Error taxonomy for deployment coordination.
//!
//! Every fatal condition names the namespace, the component (kind and id) or
//! the conflicting lock holder so an operator can act on the message alone.
//! Only [`DeployError::LockHeld`] is retryable by the caller; storage and lock
//! failures are never retried internally.

use crate::lifecycle::Phase;
use crate::remote::model::{ComponentKind, DeploymentPhase};
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the lock manager, the remote configuration store and
/// the node lifecycle coordinator.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Another holder owns a live lock on the namespace.
    #[error("namespace '{namespace}' is locked by {holder}")]
    LockHeld { namespace: String, holder: String },

    /// The local lock deadline passed before it could be renewed.
    #[error("lock on namespace '{namespace}' expired before renewal")]
    LockExpired { namespace: String },

    /// The lock record vanished or was taken over by another holder.
    #[error("lock on namespace '{namespace}' was lost (current holder: {holder})")]
    LockLost { namespace: String, holder: String },

    /// A document with this name already exists.
    #[error("document '{name}' already exists")]
    AlreadyExists { name: String },

    /// No remote configuration exists for the namespace.
    #[error("no remote configuration found for namespace '{namespace}'")]
    DocumentNotFound { namespace: String },

    /// The stored document was written by a newer tool version.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    /// A write would lower the stored schema version.
    #[error("refusing to lower schema version of '{namespace}' from {stored} to {attempted}")]
    SchemaDowngrade {
        namespace: String,
        stored: u32,
        attempted: u32,
    },

    /// A component recorded as live is missing from the cluster.
    #[error("validation failed: {kind} {name} (id {id}) {reason}")]
    Validation {
        kind: ComponentKind,
        id: u32,
        name: String,
        reason: String,
    },

    /// Handoff artifacts from an earlier phase are missing or corrupt.
    #[error("cannot resume {phase}: {reason} ({path}); re-run from {rerun_from}")]
    PhaseResume {
        phase: Phase,
        path: String,
        reason: String,
        rerun_from: Phase,
    },

    /// An earlier phase completed but a later one failed.
    #[error("phase {completed} complete, re-run {next}: {source}")]
    PhaseIncomplete {
        completed: Phase,
        next: Phase,
        #[source]
        source: Box<DeployError>,
    },

    /// A component phase change that does not follow the lifecycle order.
    #[error("{kind} {id}: illegal phase transition {from} -> {to}")]
    InvalidPhaseTransition {
        kind: ComponentKind,
        id: u32,
        from: DeploymentPhase,
        to: DeploymentPhase,
    },

    /// A component id is already used within its kind and cluster.
    #[error("{kind} {id} already exists in cluster '{cluster}'")]
    DuplicateComponent {
        kind: ComponentKind,
        id: u32,
        cluster: String,
    },

    /// A referenced component is not recorded in the document.
    #[error("{kind} '{id}' not found in namespace '{namespace}'")]
    ComponentNotFound {
        kind: ComponentKind,
        id: String,
        namespace: String,
    },

    /// A cluster reference is missing or duplicated.
    #[error("cluster '{name}': {reason}")]
    Cluster { name: String, reason: String },

    /// The document changed between read and write.
    #[error("concurrent modification of '{name}' detected")]
    Conflict { name: String },

    /// A bounded wait ran out of attempts.
    #[error("{what}: gave up after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: u32 },

    /// Document store failure.
    #[error("store error: {message}")]
    Store { message: String },

    /// Ledger submission failure.
    #[error("ledger error: {message}")]
    Ledger { message: String },

    /// Orchestration layer failure.
    #[error("orchestration error: {message}")]
    Orchestration { message: String },

    /// Encoding or decoding failure.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Local filesystem failure.
    #[error("io error: {message}")]
    Io { message: String },
}

impl DeployError {
    /// Create a LockHeld error.
    pub fn lock_held(namespace: impl Into<String>, holder: impl ToString) -> Self {
        Self::LockHeld {
            namespace: namespace.into(),
            holder: holder.to_string(),
        }
    }

    /// Create a LockLost error.
    pub fn lock_lost(namespace: impl Into<String>, holder: impl ToString) -> Self {
        Self::LockLost {
            namespace: namespace.into(),
            holder: holder.to_string(),
        }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization {
            message: message.to_string(),
        }
    }

    /// Create an Io error.
    pub fn io(message: impl ToString) -> Self {
        Self::Io {
            message: message.to_string(),
        }
    }

    /// Check if this error indicates the operation may be retried by the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::LockHeld { .. })
    }

    /// Check if this error means the namespace lock can no longer be trusted.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, Self::LockExpired { .. } | Self::LockLost { .. })
    }
}

impl From<StoreError> for DeployError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { name } => Self::AlreadyExists { name },
            StoreError::Conflict { name, .. } => Self::Conflict { name },
            other => Self::Store {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

impl From<serde_yaml::Error> for DeployError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err)
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}

/// Result type using DeployError.
pub type DeployResult<T> = Result<T, DeployError>;
