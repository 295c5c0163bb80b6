//! Node lifecycle coordinator.
//!
//! Each phase takes the namespace lock for its own duration only, so an
//! operator can stop between phases and resume later (or from another
//! machine sharing the handoff directory). Execute persists every confirmed
//! step through [`RemoteConfigStore::modify`], which means a re-run picks up
//! from the node's recorded phase instead of starting over.

use super::artifacts::{PhaseArtifactStore, PreparedChange, ReceiptArtifact};
use super::retry::RetryPolicy;
use super::{NodeOperation, Phase, PhaseOutcome};
use crate::adapters::{
    KeyMaterialProvider, LedgerClient, LedgerError, NodeSpec, OrchestrationClient, Receipt,
    Transaction,
};
use crate::core::config::Config;
use crate::core::error::{DeployError, DeployResult};
use crate::core::time::Clock;
use crate::lock::{LockGuard, LockManager};
use crate::remote::model::{
    node_alias, ComponentKind, ComponentMetadata, ConsensusNodeState, DeploymentPhase,
    RemoteConfigDocument,
};
use crate::remote::{RemoteConfigStore, RemoteConfigValidator, ValidationPolicy};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;

/// Port consensus nodes gossip on.
pub const GOSSIP_PORT: u16 = 50111;

/// Port consensus nodes serve gRPC on.
pub const GRPC_PORT: u16 = 50211;

/// Delay between submitting the freeze and the network halting.
const FREEZE_DELAY_SECONDS: i64 = 5;

/// Retry budgets and validation policy for lifecycle phases.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub lock_acquire: RetryPolicy,
    pub receipt: RetryPolicy,
    pub ready: RetryPolicy,
    pub validation: ValidationPolicy,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_acquire: config.lock_acquire_policy(),
            receipt: config.receipt_policy(),
            ready: config.ready_policy(),
            validation: ValidationPolicy::strict(),
        }
    }

    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }
}

/// What to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    /// Add a new consensus node to `cluster`.
    Add { cluster: String },
    /// Reconfigure an existing node; unset endpoints keep their defaults.
    Update {
        node_name: String,
        gossip_endpoint: Option<String>,
        grpc_endpoint: Option<String>,
        rotate_keys: bool,
    },
    /// Remove a node from the network.
    Delete { node_name: String },
    /// Move every started node to a new software version.
    Upgrade { version: semver::Version },
}

impl NodeChange {
    pub fn operation(&self) -> NodeOperation {
        match self {
            NodeChange::Add { .. } => NodeOperation::Add,
            NodeChange::Update { .. } => NodeOperation::Update,
            NodeChange::Delete { .. } => NodeOperation::Delete,
            NodeChange::Upgrade { .. } => NodeOperation::Upgrade,
        }
    }
}

/// A node change against one namespace, linked through one handoff directory.
#[derive(Debug, Clone)]
pub struct NodeChangeRequest {
    pub namespace: String,
    pub change: NodeChange,
    /// Software version to record once the change is executed.
    pub software_version: Option<semver::Version>,
    /// Handoff directory; concurrent operations need distinct directories.
    pub handoff_dir: PathBuf,
}

impl NodeChangeRequest {
    pub fn operation(&self) -> NodeOperation {
        self.change.operation()
    }

    fn artifacts(&self) -> PhaseArtifactStore {
        PhaseArtifactStore::new(&self.handoff_dir)
    }
}

/// Runs the prepare, submit-transactions and execute phases.
pub struct NodeLifecycleCoordinator {
    locks: LockManager,
    remote: RemoteConfigStore,
    validator: RemoteConfigValidator,
    orchestration: Arc<dyn OrchestrationClient>,
    ledger: Arc<dyn LedgerClient>,
    keys: Arc<dyn KeyMaterialProvider>,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl NodeLifecycleCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        locks: LockManager,
        remote: RemoteConfigStore,
        orchestration: Arc<dyn OrchestrationClient>,
        ledger: Arc<dyn LedgerClient>,
        keys: Arc<dyn KeyMaterialProvider>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            locks,
            remote,
            validator: RemoteConfigValidator::new(Arc::clone(&orchestration)),
            orchestration,
            ledger,
            keys,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    async fn lock(&self, namespace: &str) -> DeployResult<LockGuard> {
        self.locks
            .acquire_with_retry(namespace, &self.settings.lock_acquire)
            .await
    }

    async fn unlock(&self, guard: &LockGuard) {
        if let Err(e) = self.locks.release(guard).await {
            tracing::warn!(namespace = %guard.namespace(), error = %e, "failed to release lock");
        }
    }

    /// Load the document and check it against the clusters.
    async fn load_validated(&self, namespace: &str) -> DeployResult<RemoteConfigDocument> {
        let document = self.remote.load(namespace).await?;
        self.validator
            .validate(&document, &self.settings.validation)
            .await?;
        Ok(document)
    }

    // ========================================================================
    // Prepare
    // ========================================================================

    /// Draft the change and write it to the handoff directory.
    ///
    /// Makes no ledger or cluster changes. Re-running overwrites the
    /// artifact, except while a submission for the same operation is in
    /// flight: the staged node id and upgrade hash are kept so the ledger
    /// never sees two different upgrades.
    pub async fn prepare(&self, request: &NodeChangeRequest) -> DeployResult<PreparedChange> {
        let guard = self.lock(&request.namespace).await?;
        let result = self.prepare_locked(&guard, request).await;
        self.unlock(&guard).await;
        result
    }

    async fn prepare_locked(
        &self,
        guard: &LockGuard,
        request: &NodeChangeRequest,
    ) -> DeployResult<PreparedChange> {
        let artifacts = request.artifacts();
        let operation = request.operation();
        let in_flight = in_flight_receipts(&artifacts, operation)?;

        let document = self.load_validated(&request.namespace).await?;
        guard.ensure_valid()?;

        let mut prepared = self.draft(&document, request, in_flight.as_ref())?;
        if let Some(receipts) = &in_flight {
            let staged = artifacts
                .read_prepared(operation, Phase::Prepare)
                .ok()
                .filter(|staged| receipts.matches(staged));
            let same_target = receipts.node_id == prepared.node_id
                && staged.as_ref().map_or(true, |s| s.cluster == prepared.cluster);
            if !same_target {
                return Err(DeployError::PhaseResume {
                    phase: Phase::Prepare,
                    path: artifacts.receipt_path(operation).display().to_string(),
                    reason: format!(
                        "an unfinished {} for node {} has submitted transactions",
                        operation, receipts.node_id
                    ),
                    rerun_from: Phase::SubmitTransactions,
                });
            }
            if let Some(staged) = staged {
                tracing::info!(
                    namespace = %request.namespace,
                    operation = %operation,
                    "submission in flight, keeping staged change"
                );
                return Ok(staged);
            }
            prepared.upgrade_file_hash = receipts.upgrade_file_hash.clone();
        }

        let path = artifacts.write_prepared(&prepared)?;
        tracing::info!(
            namespace = %request.namespace,
            operation = %prepared.operation,
            node = %prepared.node_name,
            path = %path.display(),
            "prepared node change"
        );
        Ok(prepared)
    }

    fn draft(
        &self,
        document: &RemoteConfigDocument,
        request: &NodeChangeRequest,
        in_flight: Option<&ReceiptArtifact>,
    ) -> DeployResult<PreparedChange> {
        let components = &document.components;
        let existing_node_ids = components
            .consensus_nodes
            .iter()
            .map(|n| n.metadata.id)
            .collect();
        // A node an in-flight update already reconfigured is still its target.
        let updatable = |phase: DeploymentPhase| {
            phase == DeploymentPhase::Started
                || (in_flight.is_some() && phase == DeploymentPhase::Configured)
        };

        let (node_id, node_name, cluster_name, keys, gossip_override, grpc_override) =
            match &request.change {
                NodeChange::Add { cluster } => {
                    let node_id = match in_flight {
                        Some(receipts) => receipts.node_id,
                        None => components.peek_next_id(ComponentKind::ConsensusNode),
                    };
                    let node_name = node_alias(node_id);
                    let keys = self.keys.generate(&node_name)?;
                    (node_id, node_name, cluster.clone(), Some(keys), None, None)
                }
                NodeChange::Update {
                    node_name,
                    gossip_endpoint,
                    grpc_endpoint,
                    rotate_keys,
                } => {
                    let node = find_node(document, node_name)?;
                    if !updatable(node.metadata.phase) {
                        return Err(DeployError::InvalidPhaseTransition {
                            kind: ComponentKind::ConsensusNode,
                            id: node.metadata.id,
                            from: node.metadata.phase,
                            to: DeploymentPhase::Configured,
                        });
                    }
                    let keys = if *rotate_keys {
                        Some(self.keys.generate(node_name)?)
                    } else {
                        None
                    };
                    (
                        node.metadata.id,
                        node.name.clone(),
                        node.metadata.cluster.clone(),
                        keys,
                        gossip_endpoint.clone(),
                        grpc_endpoint.clone(),
                    )
                }
                NodeChange::Delete { node_name } => {
                    let node = find_node(document, node_name)?;
                    (
                        node.metadata.id,
                        node.name.clone(),
                        node.metadata.cluster.clone(),
                        None,
                        None,
                        None,
                    )
                }
                NodeChange::Upgrade { version } => {
                    let targets: Vec<u32> = components
                        .consensus_nodes
                        .iter()
                        .filter(|n| updatable(n.metadata.phase))
                        .map(|n| n.metadata.id)
                        .collect();
                    if targets.is_empty() {
                        return Err(DeployError::ComponentNotFound {
                            kind: ComponentKind::ConsensusNode,
                            id: "any started node".to_string(),
                            namespace: request.namespace.clone(),
                        });
                    }
                    return Ok(PreparedChange {
                        operation: NodeOperation::Upgrade,
                        namespace: request.namespace.clone(),
                        cluster: String::new(),
                        node_id: 0,
                        node_name: String::new(),
                        gossip_endpoint: String::new(),
                        grpc_endpoint: String::new(),
                        keys: None,
                        software_version: Some(version.clone()),
                        upgrade_file_hash: new_upgrade_hash(),
                        existing_node_ids: targets,
                        prepared_at: self.clock.now(),
                    });
                }
            };

        let cluster = document.require_cluster(&cluster_name)?;
        let address = cluster.node_address(&node_name);
        Ok(PreparedChange {
            operation: request.operation(),
            namespace: request.namespace.clone(),
            cluster: cluster_name,
            node_id,
            gossip_endpoint: gossip_override
                .unwrap_or_else(|| format!("{}:{}", address, GOSSIP_PORT)),
            grpc_endpoint: grpc_override.unwrap_or_else(|| format!("{}:{}", address, GRPC_PORT)),
            node_name,
            keys,
            software_version: request.software_version.clone(),
            upgrade_file_hash: new_upgrade_hash(),
            existing_node_ids,
            prepared_at: self.clock.now(),
        })
    }

    // ========================================================================
    // Submit transactions
    // ========================================================================

    /// Submit the prepared change to the ledger.
    ///
    /// Receipts are written after every confirmed transaction; a re-run
    /// skips transactions that already have one and returns immediately if
    /// all of them do.
    pub async fn submit_transactions(
        &self,
        request: &NodeChangeRequest,
    ) -> DeployResult<ReceiptArtifact> {
        let artifacts = request.artifacts();
        let operation = request.operation();
        let prepared = artifacts.read_prepared(operation, Phase::SubmitTransactions)?;

        let existing = artifacts.read_receipts(operation)?;
        if let Some(receipts) = &existing {
            if !receipts.matches(&prepared) {
                return Err(DeployError::PhaseResume {
                    phase: Phase::SubmitTransactions,
                    path: artifacts.receipt_path(operation).display().to_string(),
                    reason: format!(
                        "receipts belong to node {} upgrade {} but prepared change is for node {} upgrade {}",
                        receipts.node_id,
                        receipts.upgrade_file_hash,
                        prepared.node_id,
                        prepared.upgrade_file_hash
                    ),
                    rerun_from: Phase::Prepare,
                });
            }
            if receipts.complete {
                tracing::info!(
                    namespace = %request.namespace,
                    operation = %operation,
                    "transactions already confirmed, skipping submission"
                );
                return Ok(receipts.clone());
            }
        }

        let guard = self.lock(&request.namespace).await?;
        let result = self
            .submit_locked(&guard, &artifacts, &prepared, existing)
            .await;
        self.unlock(&guard).await;
        result
    }

    async fn submit_locked(
        &self,
        guard: &LockGuard,
        artifacts: &PhaseArtifactStore,
        prepared: &PreparedChange,
        existing: Option<ReceiptArtifact>,
    ) -> DeployResult<ReceiptArtifact> {
        let mut receipts = match existing {
            Some(receipts) => receipts,
            None => {
                if prepared.operation == NodeOperation::Add {
                    self.reserve_node_id(guard, artifacts, prepared).await?;
                }
                // Written before any transaction so a re-run never reserves twice.
                let receipts = ReceiptArtifact::new(
                    prepared.operation,
                    prepared.node_id,
                    prepared.upgrade_file_hash.clone(),
                );
                artifacts.write_receipts(&receipts)?;
                receipts
            }
        };

        for transaction in self.transactions_for(prepared) {
            let name = transaction.name();
            if receipts.has(name) {
                tracing::debug!(transaction = name, "already confirmed");
                continue;
            }
            guard.ensure_valid()?;
            let receipt = self.submit(&transaction).await?;
            tracing::info!(
                namespace = %prepared.namespace,
                transaction = name,
                status = %receipt.status,
                "transaction confirmed"
            );
            receipts.receipts.push(receipt);
            artifacts.write_receipts(&receipts)?;
        }

        receipts.complete = true;
        artifacts.write_receipts(&receipts)?;
        Ok(receipts)
    }

    /// Claim the prepared node id so a concurrent add cannot stage the same one.
    async fn reserve_node_id(
        &self,
        guard: &LockGuard,
        artifacts: &PhaseArtifactStore,
        prepared: &PreparedChange,
    ) -> DeployResult<()> {
        let node_id = prepared.node_id;
        let path = artifacts.prepared_path(prepared.operation).display().to_string();
        self.remote
            .modify(
                guard,
                &format!("{} {} (id reserved)", prepared.operation.command(), prepared.node_name),
                move |document| {
                    let next = document.components.peek_next_id(ComponentKind::ConsensusNode);
                    if next != node_id {
                        return Err(DeployError::PhaseResume {
                            phase: Phase::SubmitTransactions,
                            path,
                            reason: format!(
                                "node id {} was taken by another operation, next free id is {}",
                                node_id, next
                            ),
                            rerun_from: Phase::Prepare,
                        });
                    }
                    document.components.allocate_id(ComponentKind::ConsensusNode);
                    Ok(())
                },
            )
            .await?;
        tracing::info!(namespace = %prepared.namespace, node_id, "node id reserved");
        Ok(())
    }

    async fn submit(&self, transaction: &Transaction) -> DeployResult<Receipt> {
        self.settings
            .receipt
            .retry_if(
                transaction.name(),
                || self.ledger.submit_and_confirm(transaction),
                |e: &LedgerError| e.is_busy(),
            )
            .await
    }

    fn transactions_for(&self, prepared: &PreparedChange) -> Vec<Transaction> {
        let change = match prepared.operation {
            NodeOperation::Add => Some(Transaction::NodeCreate {
                node_id: prepared.node_id,
                gossip_endpoints: vec![prepared.gossip_endpoint.clone()],
                grpc_endpoints: vec![prepared.grpc_endpoint.clone()],
                gossip_ca_certificate: prepared
                    .keys
                    .as_ref()
                    .map(|k| k.gossip_ca_certificate.clone())
                    .unwrap_or_default(),
                admin_key: prepared
                    .keys
                    .as_ref()
                    .map(|k| k.signing_public_key.clone())
                    .unwrap_or_default(),
            }),
            NodeOperation::Update => Some(Transaction::NodeUpdate {
                node_id: prepared.node_id,
                gossip_endpoints: vec![prepared.gossip_endpoint.clone()],
                grpc_endpoints: vec![prepared.grpc_endpoint.clone()],
                gossip_ca_certificate: prepared
                    .keys
                    .as_ref()
                    .map(|k| k.gossip_ca_certificate.clone()),
            }),
            NodeOperation::Delete => Some(Transaction::NodeDelete {
                node_id: prepared.node_id,
            }),
            NodeOperation::Upgrade => None,
        };
        let start_time = self.clock.now() + chrono::Duration::seconds(FREEZE_DELAY_SECONDS);
        change
            .into_iter()
            .chain([
                Transaction::PrepareUpgrade {
                    file_hash: prepared.upgrade_file_hash.clone(),
                },
                Transaction::FreezeUpgrade {
                    file_hash: prepared.upgrade_file_hash.clone(),
                    start_time,
                },
            ])
            .collect()
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Apply the confirmed change to the clusters and the document.
    pub async fn execute(&self, request: &NodeChangeRequest) -> DeployResult<()> {
        let artifacts = request.artifacts();
        let operation = request.operation();
        let prepared = artifacts.read_prepared(operation, Phase::Execute)?;
        let mut receipts = artifacts.require_receipts(operation)?;
        if !receipts.matches(&prepared) {
            return Err(DeployError::PhaseResume {
                phase: Phase::Execute,
                path: artifacts.prepared_path(operation).display().to_string(),
                reason: "prepared change differs from the submitted one".to_string(),
                rerun_from: Phase::Prepare,
            });
        }
        if receipts.executed_at.is_some() {
            tracing::info!(
                namespace = %request.namespace,
                operation = %operation,
                "change already executed"
            );
            return Ok(());
        }

        let guard = self.lock(&request.namespace).await?;
        let result = match operation {
            NodeOperation::Add => self.execute_add(&guard, &prepared).await,
            NodeOperation::Update => self.execute_update(&guard, &prepared).await,
            NodeOperation::Delete => self.execute_delete(&guard, &prepared).await,
            NodeOperation::Upgrade => {
                self.execute_upgrade(&guard, &prepared, &artifacts, &mut receipts)
                    .await
            }
        };
        self.unlock(&guard).await;
        result?;

        receipts.executed_at = Some(self.clock.now());
        artifacts.write_receipts(&receipts)?;
        Ok(())
    }

    fn node_spec(&self, prepared: &PreparedChange) -> NodeSpec {
        NodeSpec {
            node_id: prepared.node_id,
            node_name: prepared.node_name.clone(),
            cluster: prepared.cluster.clone(),
            namespace: prepared.namespace.clone(),
            gossip_endpoint: prepared.gossip_endpoint.clone(),
            grpc_endpoint: prepared.grpc_endpoint.clone(),
            keys: prepared.keys.clone(),
            software_version: prepared.software_version.clone(),
        }
    }

    fn command(&self, prepared: &PreparedChange, node_name: &str, step: DeploymentPhase) -> String {
        format!("{} {} ({})", prepared.operation.command(), node_name, step)
    }

    async fn node_phase(&self, namespace: &str, node_id: u32) -> DeployResult<Option<DeploymentPhase>> {
        let document = self.remote.load(namespace).await?;
        Ok(document
            .components
            .find(ComponentKind::ConsensusNode, node_id)
            .map(|m| m.phase))
    }

    /// Record a phase change for the prepared node.
    async fn advance(
        &self,
        guard: &LockGuard,
        prepared: &PreparedChange,
        to: DeploymentPhase,
    ) -> DeployResult<()> {
        self.advance_node(guard, prepared, prepared.node_id, &prepared.node_name, to)
            .await
    }

    /// Record a phase change for one node of the prepared change.
    async fn advance_node(
        &self,
        guard: &LockGuard,
        prepared: &PreparedChange,
        node_id: u32,
        node_name: &str,
        to: DeploymentPhase,
    ) -> DeployResult<()> {
        let namespace = prepared.namespace.clone();
        let version = match to {
            DeploymentPhase::Started => prepared.software_version.clone(),
            _ => None,
        };
        self.remote
            .modify(guard, &self.command(prepared, node_name, to), |document| {
                document
                    .components
                    .transition(&namespace, ComponentKind::ConsensusNode, node_id, to)?;
                if let Some(version) = version {
                    document.set_version(ComponentKind::ConsensusNode, version);
                }
                Ok(())
            })
            .await?;
        tracing::info!(
            namespace = %prepared.namespace,
            node = %node_name,
            phase = %to,
            "node phase recorded"
        );
        Ok(())
    }

    /// Wait for every other live consensus node to report `frozen`.
    async fn wait_network_frozen(&self, guard: &LockGuard, prepared: &PreparedChange) -> DeployResult<()> {
        guard.ensure_valid()?;
        let document = self.remote.load(&prepared.namespace).await?;
        let peers: Vec<&ConsensusNodeState> = document
            .components
            .consensus_nodes
            .iter()
            .filter(|n| n.metadata.id != prepared.node_id)
            .filter(|n| n.metadata.phase == DeploymentPhase::Started)
            .collect();
        self.wait_frozen(&peers).await
    }

    /// Poll every node concurrently until it reports `frozen`.
    async fn wait_frozen(&self, nodes: &[&ConsensusNodeState]) -> DeployResult<()> {
        let checks = nodes.iter().map(|node| {
            let what = format!("{} frozen", node.name);
            async move {
                self.settings
                    .ready
                    .poll_until(&what, || {
                        self.orchestration.node_frozen(
                            &node.metadata.cluster,
                            &node.metadata.namespace,
                            &node.name,
                        )
                    })
                    .await
            }
        });
        join_all(checks).await.into_iter().collect::<DeployResult<Vec<()>>>()?;
        Ok(())
    }

    async fn wait_pod_ready(&self, prepared: &PreparedChange) -> DeployResult<()> {
        let selector = ComponentKind::ConsensusNode.label_selector(prepared.node_id, &prepared.node_name);
        self.settings
            .ready
            .poll_until(&format!("{} pod ready", prepared.node_name), || {
                self.orchestration
                    .pod_ready(&prepared.cluster, &prepared.namespace, &selector)
            })
            .await
    }

    async fn wait_node_active(&self, cluster: &str, namespace: &str, node_name: &str) -> DeployResult<()> {
        self.settings
            .ready
            .poll_until(&format!("{} active", node_name), || {
                self.orchestration.node_active(cluster, namespace, node_name)
            })
            .await
    }

    async fn execute_add(&self, guard: &LockGuard, prepared: &PreparedChange) -> DeployResult<()> {
        let namespace = &prepared.namespace;
        let spec = self.node_spec(prepared);

        let document = self.remote.load(namespace).await?;
        if let Some(node) = document.components.consensus_node(prepared.node_id) {
            // Only a record this change inserted itself may be resumed.
            if node.name != prepared.node_name || node.metadata.cluster != prepared.cluster {
                return Err(DeployError::DuplicateComponent {
                    kind: ComponentKind::ConsensusNode,
                    id: prepared.node_id,
                    cluster: node.metadata.cluster.clone(),
                });
            }
        } else {
            self.wait_network_frozen(guard, prepared).await?;
            let node_id = prepared.node_id;
            let cluster = prepared.cluster.clone();
            let node_name = prepared.node_name.clone();
            let ns = namespace.clone();
            self.remote
                .modify(
                    guard,
                    &self.command(prepared, &prepared.node_name, DeploymentPhase::Requested),
                    move |document| {
                        document.require_cluster(&cluster)?;
                        let block_node_ids = document
                            .components
                            .block_nodes
                            .iter()
                            .map(|b| b.metadata.id)
                            .collect();
                        document.components.insert_consensus_node(ConsensusNodeState {
                            metadata: ComponentMetadata::new(
                                node_id,
                                ns,
                                cluster,
                                DeploymentPhase::Requested,
                            ),
                            name: node_name,
                            block_node_ids,
                        })
                    },
                )
                .await?;
        }

        let phase = self
            .node_phase(namespace, prepared.node_id)
            .await?
            .unwrap_or(DeploymentPhase::Requested);

        if phase < DeploymentPhase::Deployed {
            guard.ensure_valid()?;
            self.orchestration
                .apply_node(&prepared.cluster, namespace, &spec)
                .await?;
            self.wait_pod_ready(prepared).await?;
            self.advance(guard, prepared, DeploymentPhase::Deployed).await?;
        }
        if phase < DeploymentPhase::Configured {
            guard.ensure_valid()?;
            self.orchestration
                .configure_node(&prepared.cluster, namespace, &spec)
                .await?;
            self.advance(guard, prepared, DeploymentPhase::Configured).await?;
        }
        if phase < DeploymentPhase::Started {
            guard.ensure_valid()?;
            self.orchestration
                .start_node(&prepared.cluster, namespace, &prepared.node_name)
                .await?;
            self.wait_node_active(&prepared.cluster, namespace, &prepared.node_name)
                .await?;
            self.advance(guard, prepared, DeploymentPhase::Started).await?;
        }
        Ok(())
    }

    async fn execute_update(&self, guard: &LockGuard, prepared: &PreparedChange) -> DeployResult<()> {
        let namespace = &prepared.namespace;
        let spec = self.node_spec(prepared);
        let phase = self
            .node_phase(namespace, prepared.node_id)
            .await?
            .ok_or_else(|| DeployError::ComponentNotFound {
                kind: ComponentKind::ConsensusNode,
                id: prepared.node_name.clone(),
                namespace: namespace.clone(),
            })?;

        // A node still Started has not been reconfigured yet.
        if phase == DeploymentPhase::Started {
            self.wait_network_frozen(guard, prepared).await?;
            guard.ensure_valid()?;
            self.orchestration
                .configure_node(&prepared.cluster, namespace, &spec)
                .await?;
            self.advance(guard, prepared, DeploymentPhase::Configured).await?;
        } else if phase != DeploymentPhase::Configured {
            return Err(DeployError::InvalidPhaseTransition {
                kind: ComponentKind::ConsensusNode,
                id: prepared.node_id,
                from: phase,
                to: DeploymentPhase::Configured,
            });
        }

        guard.ensure_valid()?;
        self.orchestration
            .start_node(&prepared.cluster, namespace, &prepared.node_name)
            .await?;
        self.wait_node_active(&prepared.cluster, namespace, &prepared.node_name)
            .await?;
        self.advance(guard, prepared, DeploymentPhase::Started).await
    }

    async fn execute_delete(&self, guard: &LockGuard, prepared: &PreparedChange) -> DeployResult<()> {
        let namespace = &prepared.namespace;
        let Some(phase) = self.node_phase(namespace, prepared.node_id).await? else {
            tracing::info!(namespace = %namespace, node = %prepared.node_name, "node already removed");
            return Ok(());
        };

        if phase < DeploymentPhase::Frozen {
            guard.ensure_valid()?;
            self.settings
                .ready
                .poll_until(&format!("{} frozen", prepared.node_name), || {
                    self.orchestration.node_frozen(
                        &prepared.cluster,
                        namespace,
                        &prepared.node_name,
                    )
                })
                .await?;
            self.advance(guard, prepared, DeploymentPhase::Frozen).await?;
        }
        if phase < DeploymentPhase::Stopped {
            guard.ensure_valid()?;
            self.orchestration
                .remove_node(&prepared.cluster, namespace, &prepared.node_name)
                .await?;
            self.advance(guard, prepared, DeploymentPhase::Stopped).await?;
        }

        let node_id = prepared.node_id;
        self.remote
            .modify(
                guard,
                &self.command(prepared, &prepared.node_name, DeploymentPhase::Stopped),
                |document| {
                    document.components.remove(ComponentKind::ConsensusNode, node_id);
                    for relay in &mut document.components.relay_nodes {
                        relay.consensus_node_ids.retain(|id| *id != node_id);
                    }
                    Ok(())
                },
            )
            .await?;
        tracing::info!(namespace = %namespace, node = %prepared.node_name, "node record removed");
        Ok(())
    }

    /// Restart every targeted node on the staged version.
    ///
    /// Nodes are reconfigured first and then started one by one; each
    /// restarted node is recorded in the receipts so a re-run skips it.
    async fn execute_upgrade(
        &self,
        guard: &LockGuard,
        prepared: &PreparedChange,
        artifacts: &PhaseArtifactStore,
        receipts: &mut ReceiptArtifact,
    ) -> DeployResult<()> {
        let namespace = &prepared.namespace;
        let document = self.remote.load(namespace).await?;
        let pending = prepared
            .existing_node_ids
            .iter()
            .filter(|id| !receipts.finished_node_ids.contains(*id))
            .map(|id| {
                document.components.consensus_node(*id).cloned().ok_or_else(|| {
                    DeployError::ComponentNotFound {
                        kind: ComponentKind::ConsensusNode,
                        id: node_alias(*id),
                        namespace: namespace.clone(),
                    }
                })
            })
            .collect::<DeployResult<Vec<ConsensusNodeState>>>()?;

        guard.ensure_valid()?;
        let running: Vec<&ConsensusNodeState> = pending
            .iter()
            .filter(|n| n.metadata.phase == DeploymentPhase::Started)
            .collect();
        self.wait_frozen(&running).await?;

        for node in &pending {
            match node.metadata.phase {
                DeploymentPhase::Started => {
                    guard.ensure_valid()?;
                    let spec = self.upgrade_spec(&document, prepared, node)?;
                    self.orchestration
                        .configure_node(&node.metadata.cluster, namespace, &spec)
                        .await?;
                    self.advance_node(
                        guard,
                        prepared,
                        node.metadata.id,
                        &node.name,
                        DeploymentPhase::Configured,
                    )
                    .await?;
                }
                DeploymentPhase::Configured => {}
                other => {
                    return Err(DeployError::InvalidPhaseTransition {
                        kind: ComponentKind::ConsensusNode,
                        id: node.metadata.id,
                        from: other,
                        to: DeploymentPhase::Configured,
                    })
                }
            }
        }

        for node in &pending {
            guard.ensure_valid()?;
            self.orchestration
                .start_node(&node.metadata.cluster, namespace, &node.name)
                .await?;
            self.wait_node_active(&node.metadata.cluster, namespace, &node.name)
                .await?;
            self.advance_node(
                guard,
                prepared,
                node.metadata.id,
                &node.name,
                DeploymentPhase::Started,
            )
            .await?;
            receipts.finished_node_ids.push(node.metadata.id);
            artifacts.write_receipts(receipts)?;
        }
        Ok(())
    }

    fn upgrade_spec(
        &self,
        document: &RemoteConfigDocument,
        prepared: &PreparedChange,
        node: &ConsensusNodeState,
    ) -> DeployResult<NodeSpec> {
        let address = document
            .require_cluster(&node.metadata.cluster)?
            .node_address(&node.name);
        Ok(NodeSpec {
            node_id: node.metadata.id,
            node_name: node.name.clone(),
            cluster: node.metadata.cluster.clone(),
            namespace: prepared.namespace.clone(),
            gossip_endpoint: format!("{}:{}", address, GOSSIP_PORT),
            grpc_endpoint: format!("{}:{}", address, GRPC_PORT),
            keys: None,
            software_version: prepared.software_version.clone(),
        })
    }

    // ========================================================================
    // Whole operation
    // ========================================================================

    /// Run prepare, submit-transactions and execute back to back.
    ///
    /// If a later phase fails after an earlier one completed, the error is
    /// wrapped in `PhaseIncomplete` naming the phase to re-run.
    pub async fn run_all(&self, request: &NodeChangeRequest) -> DeployResult<PhaseOutcome> {
        let mut completed: Option<Phase> = None;
        for phase in Phase::ALL {
            let result = match phase {
                Phase::Prepare => self.prepare(request).await.map(|_| ()),
                Phase::SubmitTransactions => self.submit_transactions(request).await.map(|_| ()),
                Phase::Execute => self.execute(request).await,
            };
            if let Err(e) = result {
                return Err(match completed {
                    Some(done) => DeployError::PhaseIncomplete {
                        completed: done,
                        next: phase,
                        source: Box::new(e),
                    },
                    None => e,
                });
            }
            completed = Some(phase);
        }
        Ok(PhaseOutcome::after(Phase::Execute))
    }

    // ========================================================================
    // Network freeze
    // ========================================================================

    /// Freeze the network and record every started consensus node as frozen.
    ///
    /// Returns the names of the nodes that were frozen.
    pub async fn freeze_network(&self, namespace: &str) -> DeployResult<Vec<String>> {
        let guard = self.lock(namespace).await?;
        let result = self.freeze_locked(&guard, namespace).await;
        self.unlock(&guard).await;
        result
    }

    async fn freeze_locked(&self, guard: &LockGuard, namespace: &str) -> DeployResult<Vec<String>> {
        let document = self.load_validated(namespace).await?;
        let nodes: Vec<ConsensusNodeState> = document
            .components
            .consensus_nodes
            .iter()
            .filter(|n| n.metadata.phase == DeploymentPhase::Started)
            .cloned()
            .collect();

        guard.ensure_valid()?;
        let start_time = self.clock.now() + chrono::Duration::seconds(FREEZE_DELAY_SECONDS);
        let receipt = self.submit(&Transaction::Freeze { start_time }).await?;
        tracing::info!(namespace, status = %receipt.status, "freeze confirmed");

        self.wait_frozen(&nodes.iter().collect::<Vec<_>>()).await?;

        let ids: Vec<u32> = nodes.iter().map(|n| n.metadata.id).collect();
        let ns = namespace.to_string();
        self.remote
            .modify(guard, "network freeze", move |document| {
                for id in ids {
                    document.components.transition(
                        &ns,
                        ComponentKind::ConsensusNode,
                        id,
                        DeploymentPhase::Frozen,
                    )?;
                }
                Ok(())
            })
            .await?;

        Ok(nodes.into_iter().map(|n| n.name).collect())
    }
}

fn new_upgrade_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Receipts of a submission that has not been executed yet. Receipts of an
/// executed change are cleared so the next operation starts fresh.
fn in_flight_receipts(
    artifacts: &PhaseArtifactStore,
    operation: NodeOperation,
) -> DeployResult<Option<ReceiptArtifact>> {
    match artifacts.read_receipts(operation)? {
        Some(receipts) if receipts.executed_at.is_none() => Ok(Some(receipts)),
        Some(_) => {
            artifacts.remove_receipts(operation)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

fn find_node<'a>(
    document: &'a RemoteConfigDocument,
    node_name: &str,
) -> DeployResult<&'a ConsensusNodeState> {
    document
        .components
        .consensus_node_by_name(node_name)
        .ok_or_else(|| DeployError::ComponentNotFound {
            kind: ComponentKind::ConsensusNode,
            id: node_name.to_string(),
            namespace: document.namespace().to_string(),
        })
}
