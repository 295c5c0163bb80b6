//! Handoff artifacts linking lifecycle phases.
//!
//! Prepare writes `<op>-prepared.json`; submit-transactions appends to
//! `<op>-receipt.json` after every confirmed transaction so an interrupted
//! submission resumes without resubmitting. Files are replaced atomically
//! (temp file + rename) so a crash never leaves a half-written artifact.

use super::{NodeOperation, Phase};
use crate::adapters::{NodeKeys, Receipt};
use crate::core::error::{DeployError, DeployResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Topology change drafted by the prepare phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedChange {
    pub operation: NodeOperation,
    pub namespace: String,
    pub cluster: String,
    pub node_id: u32,
    pub node_name: String,
    pub gossip_endpoint: String,
    pub grpc_endpoint: String,
    /// Newly generated keys; absent for deletes and key-preserving updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<NodeKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<semver::Version>,
    /// Identifier of the upgrade staged by prepare-upgrade.
    pub upgrade_file_hash: String,
    /// Consensus node ids present when the change was prepared. For a
    /// network upgrade these are the nodes to restart, and the single-node
    /// fields above are left empty with `node_id` 0.
    #[serde(default)]
    pub existing_node_ids: Vec<u32>,
    pub prepared_at: DateTime<Utc>,
}

/// Receipts collected by the submit-transactions phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptArtifact {
    pub operation: NodeOperation,
    pub node_id: u32,
    /// Upgrade staged by this submission; a re-prepare must keep it.
    #[serde(default)]
    pub upgrade_file_hash: String,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
    /// Every transaction of the operation is confirmed.
    #[serde(default)]
    pub complete: bool,
    /// Set once execute finished applying the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Nodes a network upgrade already restarted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finished_node_ids: Vec<u32>,
}

impl ReceiptArtifact {
    pub fn new(operation: NodeOperation, node_id: u32, upgrade_file_hash: impl Into<String>) -> Self {
        Self {
            operation,
            node_id,
            upgrade_file_hash: upgrade_file_hash.into(),
            receipts: Vec::new(),
            complete: false,
            executed_at: None,
            finished_node_ids: Vec::new(),
        }
    }

    /// Check whether this receipt was collected for `prepared`.
    pub fn matches(&self, prepared: &PreparedChange) -> bool {
        self.operation == prepared.operation
            && self.node_id == prepared.node_id
            && self.upgrade_file_hash == prepared.upgrade_file_hash
    }

    /// Check whether a transaction with this name was confirmed.
    pub fn has(&self, transaction: &str) -> bool {
        self.receipts.iter().any(|r| r.transaction == transaction)
    }
}

/// Handoff directory for one logical operation.
#[derive(Debug, Clone)]
pub struct PhaseArtifactStore {
    dir: PathBuf,
}

impl PhaseArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prepared_path(&self, operation: NodeOperation) -> PathBuf {
        self.dir.join(operation.prepared_file())
    }

    pub fn receipt_path(&self, operation: NodeOperation) -> PathBuf {
        self.dir.join(operation.receipt_file())
    }

    /// Write the prepare artifact, replacing any earlier one.
    pub fn write_prepared(&self, prepared: &PreparedChange) -> DeployResult<PathBuf> {
        let path = self.prepared_path(prepared.operation);
        write_json(&path, prepared)?;
        Ok(path)
    }

    /// Read the prepare artifact on behalf of `resuming`.
    ///
    /// A missing or unreadable file fails with `PhaseResume` pointing back
    /// at the prepare phase.
    pub fn read_prepared(
        &self,
        operation: NodeOperation,
        resuming: Phase,
    ) -> DeployResult<PreparedChange> {
        let path = self.prepared_path(operation);
        let prepared: PreparedChange = read_json(&path)
            .map_err(|reason| resume_error(resuming, &path, reason, Phase::Prepare))?
            .ok_or_else(|| {
                resume_error(resuming, &path, "artifact not found".into(), Phase::Prepare)
            })?;
        if prepared.operation != operation {
            return Err(resume_error(
                resuming,
                &path,
                format!("artifact is for {}", prepared.operation),
                Phase::Prepare,
            ));
        }
        Ok(prepared)
    }

    /// Read the receipt artifact if one exists.
    pub fn read_receipts(&self, operation: NodeOperation) -> DeployResult<Option<ReceiptArtifact>> {
        let path = self.receipt_path(operation);
        read_json(&path).map_err(|reason| {
            resume_error(Phase::SubmitTransactions, &path, reason, Phase::Prepare)
        })
    }

    /// Read a complete receipt artifact for the execute phase.
    pub fn require_receipts(&self, operation: NodeOperation) -> DeployResult<ReceiptArtifact> {
        let path = self.receipt_path(operation);
        let receipts: ReceiptArtifact = read_json(&path)
            .map_err(|reason| {
                resume_error(Phase::Execute, &path, reason, Phase::SubmitTransactions)
            })?
            .ok_or_else(|| {
                resume_error(
                    Phase::Execute,
                    &path,
                    "artifact not found".into(),
                    Phase::SubmitTransactions,
                )
            })?;
        if !receipts.complete {
            return Err(resume_error(
                Phase::Execute,
                &path,
                "transactions not fully confirmed".into(),
                Phase::SubmitTransactions,
            ));
        }
        Ok(receipts)
    }

    /// Write the receipt artifact.
    pub fn write_receipts(&self, receipts: &ReceiptArtifact) -> DeployResult<PathBuf> {
        let path = self.receipt_path(receipts.operation);
        write_json(&path, receipts)?;
        Ok(path)
    }

    /// Remove the receipt artifact; absent is fine.
    pub fn remove_receipts(&self, operation: NodeOperation) -> DeployResult<()> {
        match std::fs::remove_file(self.receipt_path(operation)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn resume_error(phase: Phase, path: &Path, reason: String, rerun_from: Phase) -> DeployError {
    DeployError::PhaseResume {
        phase,
        path: path.display().to_string(),
        reason,
        rerun_from,
    }
}

/// Read a JSON artifact; `Ok(None)` if absent, `Err(reason)` if unreadable.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("unreadable: {}", e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| format!("corrupt artifact: {}", e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> DeployResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| DeployError::io(e.error))?;
    Ok(())
}
