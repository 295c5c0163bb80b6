//! Ledger transaction submission.

use crate::core::error::DeployError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network-changing transactions the coordinator submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Transaction {
    /// Register a new consensus node.
    NodeCreate {
        node_id: u32,
        gossip_endpoints: Vec<String>,
        grpc_endpoints: Vec<String>,
        gossip_ca_certificate: String,
        admin_key: String,
    },
    /// Change a consensus node's endpoints or keys.
    NodeUpdate {
        node_id: u32,
        gossip_endpoints: Vec<String>,
        grpc_endpoints: Vec<String>,
        gossip_ca_certificate: Option<String>,
    },
    /// Remove a consensus node from the address book.
    NodeDelete { node_id: u32 },
    /// Stage the upgrade that applies pending address book changes.
    PrepareUpgrade { file_hash: String },
    /// Freeze the network so the staged upgrade takes effect.
    FreezeUpgrade {
        file_hash: String,
        start_time: DateTime<Utc>,
    },
    /// Freeze the network without an upgrade.
    Freeze { start_time: DateTime<Utc> },
}

impl Transaction {
    /// Short name used in logs and receipts.
    pub fn name(&self) -> &'static str {
        match self {
            Transaction::NodeCreate { .. } => "node-create",
            Transaction::NodeUpdate { .. } => "node-update",
            Transaction::NodeDelete { .. } => "node-delete",
            Transaction::PrepareUpgrade { .. } => "prepare-upgrade",
            Transaction::FreezeUpgrade { .. } => "freeze-upgrade",
            Transaction::Freeze { .. } => "freeze",
        }
    }
}

/// Confirmation returned once a transaction reached consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction: String,
    pub transaction_id: String,
    pub status: String,
}

/// Ledger submission failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The network is temporarily unable to accept the transaction.
    #[error("ledger busy: {message}")]
    Busy { message: String },

    /// The transaction reached consensus with a failure status.
    #[error("transaction rejected with status {status}")]
    Rejected { status: String },

    /// Connection or protocol failure.
    #[error("ledger transport error: {message}")]
    Transport { message: String },
}

impl LedgerError {
    /// Check if resubmitting may succeed.
    pub fn is_busy(&self) -> bool {
        matches!(self, LedgerError::Busy { .. })
    }
}

impl From<LedgerError> for DeployError {
    fn from(err: LedgerError) -> Self {
        DeployError::Ledger {
            message: err.to_string(),
        }
    }
}

/// Submits transactions and waits for their receipts.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit `transaction` and wait until it is confirmed.
    async fn submit_and_confirm(&self, transaction: &Transaction) -> Result<Receipt, LedgerError>;
}
