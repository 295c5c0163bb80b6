//! Common test utilities.
//!
//! Shared fakes and builders for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ledgerdeck::adapters::{
    KeyMaterialProvider, LedgerClient, LedgerError, NodeKeys, NodeSpec, OrchestrationClient,
    PodInfo, Receipt, Transaction,
};
use ledgerdeck::core::error::{DeployError, DeployResult};
use ledgerdeck::core::time::{Clock, ManualClock};
use ledgerdeck::lifecycle::{
    LifecycleSettings, NodeChange, NodeChangeRequest, NodeLifecycleCoordinator, RetryPolicy,
};
use ledgerdeck::lock::{LockHolder, LockManager, LockSettings};
use ledgerdeck::remote::model::{
    node_alias, ClusterRef, ComponentMetadata, ConsensusNodeState, DeploymentPhase, UpdatedBy,
};
use ledgerdeck::remote::{RemoteConfigDocument, RemoteConfigStore, ValidationPolicy};
use ledgerdeck::store::{DocumentStore, MemoryDocumentStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

pub const NAMESPACE: &str = "ns1";
pub const CLUSTER: &str = "cluster-a";

/// Fixed starting instant for manual clocks.
pub fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Write `content` to a temporary TOML file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Lock holder for a named operator on a fixed host.
pub fn holder(name: &str) -> LockHolder {
    LockHolder::new(name, "build-host", 4242)
}

/// Retry policy that gives up quickly.
pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1))
}

/// Assert that a result is Err and return the error.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}

// ============================================================================
// Fakes
// ============================================================================

/// In-memory cluster. Every node exists, is ready and active unless told
/// otherwise.
#[derive(Default)]
pub struct FakeOrchestration {
    /// Node names whose pods are missing.
    missing: Mutex<HashSet<String>>,
    /// Node names that report frozen.
    frozen: Mutex<HashSet<String>>,
    /// Every node reports frozen.
    all_frozen: AtomicBool,
    /// Nodes never become active.
    inactive: AtomicBool,
    /// Operation name that fails, e.g. `start node4`.
    fail_on: Mutex<Option<String>>,
    /// Operations performed, in order.
    calls: Mutex<Vec<String>>,
}

impl FakeOrchestration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn remove_pod(&self, node_name: &str) {
        self.missing.lock().insert(node_name.to_string());
    }

    pub fn freeze(&self, node_name: &str) {
        self.frozen.lock().insert(node_name.to_string());
    }

    pub fn freeze_all(&self) {
        self.all_frozen.store(true, Ordering::SeqCst);
    }

    pub fn set_inactive(&self, inactive: bool) {
        self.inactive.store(inactive, Ordering::SeqCst);
    }

    pub fn fail_on(&self, call: Option<&str>) {
        *self.fail_on.lock() = call.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> DeployResult<()> {
        if self.fail_on.lock().as_deref() == Some(call.as_str()) {
            return Err(DeployError::Orchestration {
                message: format!("{} failed", call),
            });
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl OrchestrationClient for FakeOrchestration {
    async fn list_pods(
        &self,
        _cluster: &str,
        _namespace: &str,
        selector: &str,
    ) -> DeployResult<Vec<PodInfo>> {
        let missing = self.missing.lock();
        if missing
            .iter()
            .any(|name| selector.ends_with(&format!("-{}", name)))
        {
            return Ok(Vec::new());
        }
        Ok(vec![PodInfo {
            name: format!("{}-0", selector.rsplit('=').next().unwrap_or(selector)),
            ready: true,
        }])
    }

    async fn apply_node(&self, _cluster: &str, _namespace: &str, spec: &NodeSpec) -> DeployResult<()> {
        self.record(format!("apply {}", spec.node_name))
    }

    async fn configure_node(
        &self,
        _cluster: &str,
        _namespace: &str,
        spec: &NodeSpec,
    ) -> DeployResult<()> {
        self.record(format!("configure {}", spec.node_name))
    }

    async fn start_node(&self, _cluster: &str, _namespace: &str, node_name: &str) -> DeployResult<()> {
        self.record(format!("start {}", node_name))
    }

    async fn remove_node(&self, _cluster: &str, _namespace: &str, node_name: &str) -> DeployResult<()> {
        self.record(format!("remove {}", node_name))
    }

    async fn pod_ready(&self, _cluster: &str, _namespace: &str, _selector: &str) -> DeployResult<bool> {
        Ok(true)
    }

    async fn node_active(&self, _cluster: &str, _namespace: &str, _node_name: &str) -> DeployResult<bool> {
        Ok(!self.inactive.load(Ordering::SeqCst))
    }

    async fn node_frozen(&self, _cluster: &str, _namespace: &str, node_name: &str) -> DeployResult<bool> {
        Ok(self.all_frozen.load(Ordering::SeqCst) || self.frozen.lock().contains(node_name))
    }
}

/// Ledger that confirms everything, with injectable failures.
#[derive(Default)]
pub struct FakeLedger {
    submissions: AtomicU32,
    /// Busy responses to return before accepting.
    busy_remaining: AtomicU32,
    /// Transaction name to reject.
    reject: Mutex<Option<String>>,
    /// Confirmed transactions, in order.
    confirmed: Mutex<Vec<Transaction>>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total submission attempts, including rejected and busy ones.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Names of confirmed transactions.
    pub fn confirmed(&self) -> Vec<String> {
        self.confirmed
            .lock()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.confirmed.lock().clone()
    }

    /// File hashes carried by confirmed prepare-upgrade and freeze-upgrade
    /// transactions.
    pub fn upgrade_hashes(&self) -> Vec<String> {
        self.confirmed
            .lock()
            .iter()
            .filter_map(|t| match t {
                Transaction::PrepareUpgrade { file_hash } => Some(file_hash.clone()),
                Transaction::FreezeUpgrade { file_hash, .. } => Some(file_hash.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn busy_for(&self, attempts: u32) {
        self.busy_remaining.store(attempts, Ordering::SeqCst);
    }

    pub fn reject(&self, transaction: Option<&str>) {
        *self.reject.lock() = transaction.map(str::to_string);
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn submit_and_confirm(&self, transaction: &Transaction) -> Result<Receipt, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let busy = self
            .busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if busy {
            return Err(LedgerError::Busy {
                message: "PLATFORM_TRANSACTION_NOT_CREATED".into(),
            });
        }
        if self.reject.lock().as_deref() == Some(transaction.name()) {
            return Err(LedgerError::Rejected {
                status: "INVALID_NODE_ID".into(),
            });
        }
        self.confirmed.lock().push(transaction.clone());
        Ok(Receipt {
            transaction: transaction.name().to_string(),
            transaction_id: format!("0.0.2@1714564800.{:09}", n),
            status: "SUCCESS".into(),
        })
    }
}

/// Deterministic key generator.
#[derive(Default)]
pub struct FakeKeys {
    generated: AtomicU32,
}

impl FakeKeys {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn generated(&self) -> u32 {
        self.generated.load(Ordering::SeqCst)
    }
}

impl KeyMaterialProvider for FakeKeys {
    fn generate(&self, node_name: &str) -> DeployResult<NodeKeys> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(NodeKeys {
            node_name: node_name.to_string(),
            signing_public_key: format!("signing-{}", node_name),
            gossip_ca_certificate: format!("gossip-ca-{}", node_name),
            tls_certificate_hash: format!("tls-hash-{}", node_name),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Shared store, manual clock, fakes and a handoff directory.
pub struct Harness {
    pub store: MemoryDocumentStore,
    pub clock: ManualClock,
    pub orchestration: Arc<FakeOrchestration>,
    pub ledger: Arc<FakeLedger>,
    pub keys: Arc<FakeKeys>,
    pub handoff: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryDocumentStore::new(),
            clock: ManualClock::new(epoch()),
            orchestration: FakeOrchestration::new(),
            ledger: FakeLedger::new(),
            keys: FakeKeys::new(),
            handoff: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.store.clone())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Lock manager for `name` without background renewal.
    pub fn locks_for(&self, name: &str) -> LockManager {
        LockManager::new(
            self.store(),
            self.clock(),
            holder(name),
            LockSettings {
                duration_seconds: 20,
                auto_renew: false,
            },
        )
    }

    pub fn remote(&self) -> RemoteConfigStore {
        RemoteConfigStore::new(self.store(), self.clock(), 50)
    }

    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            lock_acquire: fast_policy(2),
            receipt: fast_policy(3),
            ready: fast_policy(3),
            validation: ValidationPolicy::strict(),
        }
    }

    pub fn coordinator(&self) -> NodeLifecycleCoordinator {
        self.coordinator_with(self.settings())
    }

    pub fn coordinator_with(&self, settings: LifecycleSettings) -> NodeLifecycleCoordinator {
        NodeLifecycleCoordinator::new(
            self.locks_for("alice"),
            self.remote(),
            self.orchestration.clone(),
            self.ledger.clone(),
            self.keys.clone(),
            self.clock(),
            settings,
        )
    }

    pub fn request(&self, change: NodeChange) -> NodeChangeRequest {
        self.request_in(change, self.handoff.path())
    }

    /// Request linked through another handoff directory, as a second
    /// operator would run it.
    pub fn request_in(&self, change: NodeChange, handoff_dir: &Path) -> NodeChangeRequest {
        NodeChangeRequest {
            namespace: NAMESPACE.to_string(),
            change,
            software_version: Some(semver::Version::new(0, 54, 2)),
            handoff_dir: handoff_dir.to_path_buf(),
        }
    }

    /// Deployment document for [`NAMESPACE`] with `nodes` started consensus
    /// nodes named `node1..nodeN`.
    pub fn seed_document(&self, nodes: u32) -> RemoteConfigDocument {
        let mut document = RemoteConfigDocument::new(
            NAMESPACE,
            "deploy1",
            UpdatedBy {
                name: "seed".into(),
                hostname: "build-host".into(),
            },
            self.clock.now(),
            "0.1.0",
        );
        document
            .add_cluster(ClusterRef::new(CLUSTER, NAMESPACE, "deploy1"))
            .unwrap();
        for id in 1..=nodes {
            document
                .components
                .insert_consensus_node(ConsensusNodeState {
                    metadata: ComponentMetadata::new(id, NAMESPACE, CLUSTER, DeploymentPhase::Started),
                    name: node_alias(id),
                    block_node_ids: Vec::new(),
                })
                .unwrap();
        }
        document
    }

    /// Store [`seed_document`](Self::seed_document) as the namespace's
    /// remote configuration.
    pub async fn seed(&self, nodes: u32) -> RemoteConfigDocument {
        let document = self.seed_document(nodes);
        self.remote().create(&document).await.unwrap();
        document
    }

    pub async fn load(&self) -> RemoteConfigDocument {
        self.remote().load(NAMESPACE).await.unwrap()
    }
}
