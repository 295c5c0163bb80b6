//! Consensus node lifecycle.
//!
//! Adding, updating, deleting or upgrading consensus nodes is split into
//! three phases that can each be run, fail and be re-run on their own:
//!
//! 1. **prepare** - local work only: key material, endpoints and the draft
//!    topology change, written to a handoff directory
//! 2. **submit-transactions** - the node transaction plus prepare-upgrade and
//!    freeze-upgrade, with receipts written back to the handoff directory
//! 3. **execute** - cluster changes, readiness waits and phase updates in
//!    the remote configuration
//!
//! - [`artifacts`] - Handoff files linking the phases
//! - [`coordinator`] - Phase implementations
//! - [`retry`] - Bounded retry policies

pub mod artifacts;
pub mod coordinator;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use artifacts::{PhaseArtifactStore, PreparedChange, ReceiptArtifact};
pub use coordinator::{LifecycleSettings, NodeChange, NodeChangeRequest, NodeLifecycleCoordinator};
pub use retry::RetryPolicy;

/// Node operation carried through the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeOperation {
    Add,
    Update,
    Delete,
    /// Software upgrade of every started node.
    Upgrade,
}

impl NodeOperation {
    /// Artifact prefix, e.g. `node-add`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeOperation::Add => "node-add",
            NodeOperation::Update => "node-update",
            NodeOperation::Delete => "node-delete",
            NodeOperation::Upgrade => "node-upgrade",
        }
    }

    /// Command name recorded in the deployment history.
    pub fn command(&self) -> &'static str {
        match self {
            NodeOperation::Add => "node add",
            NodeOperation::Update => "node update",
            NodeOperation::Delete => "node delete",
            NodeOperation::Upgrade => "node upgrade",
        }
    }

    /// File name of the prepare artifact.
    pub fn prepared_file(&self) -> String {
        format!("{}-prepared.json", self.as_str())
    }

    /// File name of the receipt artifact.
    pub fn receipt_file(&self) -> String {
        format!("{}-receipt.json", self.as_str())
    }
}

impl fmt::Display for NodeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three independently resumable phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Prepare,
    SubmitTransactions,
    Execute,
}

impl Phase {
    /// Phases in run order.
    pub const ALL: [Phase; 3] = [Phase::Prepare, Phase::SubmitTransactions, Phase::Execute];

    /// Phase that follows this one.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Prepare => Some(Phase::SubmitTransactions),
            Phase::SubmitTransactions => Some(Phase::Execute),
            Phase::Execute => None,
        }
    }

    /// Phase that produces this phase's input artifact.
    pub fn previous(&self) -> Option<Phase> {
        match self {
            Phase::Prepare => None,
            Phase::SubmitTransactions => Some(Phase::Prepare),
            Phase::Execute => Some(Phase::SubmitTransactions),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::SubmitTransactions => "submit-transactions",
            Phase::Execute => "execute",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running phases back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Last phase that completed.
    pub completed: Phase,
    /// Phase to run next, if any.
    pub next: Option<Phase>,
}

impl PhaseOutcome {
    pub fn after(completed: Phase) -> Self {
        Self {
            completed,
            next: completed.next(),
        }
    }

    /// Check if every phase completed.
    pub fn is_complete(&self) -> bool {
        self.next.is_none()
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.next {
            Some(next) => write!(f, "phase {} complete, re-run {}", self.completed, next),
            None => write!(f, "phase {} complete, operation finished", self.completed),
        }
    }
}
