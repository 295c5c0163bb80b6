//! Node lifecycle coordinator tests.

mod common;

use common::{Harness, CLUSTER, NAMESPACE};
use ledgerdeck::core::error::DeployError;
use ledgerdeck::lifecycle::{NodeChange, NodeOperation, Phase, PhaseArtifactStore, ReceiptArtifact};
use ledgerdeck::remote::model::{
    ClusterRef, ComponentKind, ComponentMetadata, ConsensusNodeState, DeploymentPhase,
    RelayNodeState,
};

fn add() -> NodeChange {
    NodeChange::Add {
        cluster: CLUSTER.to_string(),
    }
}

fn upgrade() -> NodeChange {
    NodeChange::Upgrade {
        version: semver::Version::new(0, 55, 0),
    }
}

fn artifacts(h: &Harness) -> PhaseArtifactStore {
    PhaseArtifactStore::new(h.handoff.path())
}

async fn assert_unlocked(h: &Harness) {
    assert!(!h.locks_for("observer").is_held(NAMESPACE).await.unwrap());
}

// ============================================================================
// Add
// ============================================================================

#[tokio::test]
async fn add_runs_all_phases() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();

    let outcome = h.coordinator().run_all(&h.request(add())).await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.completed, Phase::Execute);

    let doc = h.load().await;
    let node = doc.components.consensus_node(4).unwrap();
    assert_eq!(node.name, "node4");
    assert_eq!(node.metadata.phase, DeploymentPhase::Started);
    assert_eq!(doc.components.peek_next_id(ComponentKind::ConsensusNode), 5);
    assert_eq!(
        doc.versions.get(&ComponentKind::ConsensusNode),
        Some(&semver::Version::new(0, 54, 2))
    );
    assert_eq!(
        doc.history.last_executed_command.as_deref(),
        Some("node add node4 (started)")
    );

    assert_eq!(
        h.ledger.confirmed(),
        vec!["node-create", "prepare-upgrade", "freeze-upgrade"]
    );
    assert_eq!(
        h.orchestration.calls(),
        vec!["apply node4", "configure node4", "start node4"]
    );
    assert_eq!(h.keys.generated(), 1);
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn prepare_is_local_only() {
    let h = Harness::new();
    h.seed(3).await;
    let coordinator = h.coordinator();
    let request = h.request(add());

    let prepared = coordinator.prepare(&request).await.unwrap();
    assert_eq!(prepared.node_id, 4);
    assert_eq!(prepared.node_name, "node4");
    assert_eq!(
        prepared.gossip_endpoint,
        "network-node4-svc.ns1.svc.cluster.local:50111"
    );
    assert_eq!(prepared.grpc_endpoint, "network-node4-svc.ns1.svc.cluster.local:50211");
    assert_eq!(prepared.existing_node_ids, vec![1, 2, 3]);
    assert!(prepared.keys.is_some());

    assert!(artifacts(&h).prepared_path(NodeOperation::Add).exists());
    assert_eq!(h.ledger.submissions(), 0);
    assert!(h.orchestration.calls().is_empty());
    assert!(h.load().await.components.consensus_node(4).is_none());

    // Re-running overwrites the artifact with the same allocation.
    let again = coordinator.prepare(&request).await.unwrap();
    assert_eq!(again.node_id, 4);
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn prepare_fails_validation_for_missing_node() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.remove_pod("node2");

    let err = h.coordinator().run_all(&h.request(add())).await.unwrap_err();
    assert!(matches!(err, DeployError::Validation { id: 2, .. }));
    assert!(!artifacts(&h).prepared_path(NodeOperation::Add).exists());
    assert_unlocked(&h).await;
}

// ============================================================================
// Submit transactions
// ============================================================================

#[tokio::test]
async fn submit_resumes_without_resubmitting() {
    let h = Harness::new();
    h.seed(3).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();

    h.ledger.reject(Some("freeze-upgrade"));
    let err = coordinator.submit_transactions(&request).await.unwrap_err();
    assert!(matches!(err, DeployError::Ledger { .. }));
    assert_eq!(h.ledger.submissions(), 3);

    let partial = artifacts(&h)
        .read_receipts(NodeOperation::Add)
        .unwrap()
        .unwrap();
    assert!(!partial.complete);
    assert_eq!(partial.receipts.len(), 2);

    h.ledger.reject(None);
    let receipts = coordinator.submit_transactions(&request).await.unwrap();
    assert!(receipts.complete);
    assert_eq!(h.ledger.submissions(), 4);
    assert_eq!(
        h.ledger.confirmed(),
        vec!["node-create", "prepare-upgrade", "freeze-upgrade"]
    );

    // A complete receipt is never resubmitted.
    coordinator.submit_transactions(&request).await.unwrap();
    assert_eq!(h.ledger.submissions(), 4);
}

#[tokio::test]
async fn busy_ledger_is_retried() {
    let h = Harness::new();
    h.seed(1).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();

    h.ledger.busy_for(2);
    coordinator.submit_transactions(&request).await.unwrap();
    assert_eq!(h.ledger.submissions(), 5);
}

#[tokio::test]
async fn busy_ledger_exhausts_retries() {
    let h = Harness::new();
    h.seed(1).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();

    h.ledger.busy_for(10);
    let err = coordinator.submit_transactions(&request).await.unwrap_err();
    assert!(matches!(err, DeployError::RetriesExhausted { attempts: 3, .. }));
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn submit_without_prepare_points_back() {
    let h = Harness::new();
    h.seed(1).await;

    let err = h
        .coordinator()
        .submit_transactions(&h.request(add()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            phase: Phase::SubmitTransactions,
            rerun_from: Phase::Prepare,
            ..
        }
    ));
    assert_eq!(h.ledger.submissions(), 0);
}

#[tokio::test]
async fn receipts_for_another_node_are_rejected() {
    let h = Harness::new();
    h.seed(1).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();
    artifacts(&h)
        .write_receipts(&ReceiptArtifact::new(NodeOperation::Add, 9, ""))
        .unwrap();

    let err = coordinator.submit_transactions(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            rerun_from: Phase::Prepare,
            ..
        }
    ));
}

#[tokio::test]
async fn concurrent_adds_do_not_share_a_node_id() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();
    let coordinator = h.coordinator();
    let other_handoff = tempfile::tempdir().unwrap();
    let first = h.request(add());
    let second = h.request_in(add(), other_handoff.path());

    assert_eq!(coordinator.prepare(&first).await.unwrap().node_id, 4);
    assert_eq!(coordinator.prepare(&second).await.unwrap().node_id, 4);

    coordinator.submit_transactions(&first).await.unwrap();
    let err = coordinator.submit_transactions(&second).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            phase: Phase::SubmitTransactions,
            rerun_from: Phase::Prepare,
            ..
        }
    ));
    assert!(err.to_string().contains("node id 4 was taken"));
    assert_eq!(h.ledger.submissions(), 3);
    assert!(PhaseArtifactStore::new(other_handoff.path())
        .read_receipts(NodeOperation::Add)
        .unwrap()
        .is_none());

    assert_eq!(coordinator.prepare(&second).await.unwrap().node_id, 5);
    coordinator.submit_transactions(&second).await.unwrap();
    coordinator.execute(&first).await.unwrap();
    coordinator.execute(&second).await.unwrap();

    let doc = h.load().await;
    let names: Vec<&str> = doc
        .components
        .consensus_nodes
        .iter()
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(names, vec!["node1", "node2", "node3", "node4", "node5"]);
    assert!(doc
        .components
        .consensus_nodes
        .iter()
        .all(|n| n.metadata.phase == DeploymentPhase::Started));
}

#[tokio::test]
async fn reprepare_keeps_upgrade_staged_by_inflight_submission() {
    let h = Harness::new();
    h.seed(3).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    let first = coordinator.prepare(&request).await.unwrap();

    h.ledger.reject(Some("freeze-upgrade"));
    coordinator.submit_transactions(&request).await.unwrap_err();
    h.ledger.reject(None);

    let again = coordinator.prepare(&request).await.unwrap();
    assert_eq!(again.node_id, 4);
    assert_eq!(again.upgrade_file_hash, first.upgrade_file_hash);

    // Without the staged file the receipt still pins the id and hash.
    std::fs::remove_file(artifacts(&h).prepared_path(NodeOperation::Add)).unwrap();
    let rebuilt = coordinator.prepare(&request).await.unwrap();
    assert_eq!(rebuilt.node_id, 4);
    assert_eq!(rebuilt.upgrade_file_hash, first.upgrade_file_hash);

    coordinator.submit_transactions(&request).await.unwrap();
    assert_eq!(
        h.ledger.upgrade_hashes(),
        vec![first.upgrade_file_hash.clone(), first.upgrade_file_hash.clone()]
    );
}

#[tokio::test]
async fn submit_rejects_prepared_change_with_another_upgrade_hash() {
    let h = Harness::new();
    h.seed(2).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    let staged = coordinator.prepare(&request).await.unwrap();

    h.ledger.reject(Some("freeze-upgrade"));
    coordinator.submit_transactions(&request).await.unwrap_err();
    h.ledger.reject(None);
    let confirmed = h.ledger.submissions();

    let mut tampered = staged.clone();
    tampered.upgrade_file_hash = "0".repeat(32);
    artifacts(&h).write_prepared(&tampered).unwrap();

    let err = coordinator.submit_transactions(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            phase: Phase::SubmitTransactions,
            rerun_from: Phase::Prepare,
            ..
        }
    ));
    assert_eq!(h.ledger.submissions(), confirmed);

    let restored = coordinator.prepare(&request).await.unwrap();
    assert_eq!(restored.upgrade_file_hash, staged.upgrade_file_hash);
    coordinator.submit_transactions(&request).await.unwrap();
    assert!(h
        .ledger
        .upgrade_hashes()
        .iter()
        .all(|hash| *hash == staged.upgrade_file_hash));
}

#[tokio::test]
async fn prepare_for_another_node_waits_for_inflight_submission() {
    let h = Harness::new();
    h.seed(3).await;
    let coordinator = h.coordinator();
    let update = |node: &str| {
        h.request(NodeChange::Update {
            node_name: node.into(),
            gossip_endpoint: None,
            grpc_endpoint: None,
            rotate_keys: false,
        })
    };
    coordinator.prepare(&update("node2")).await.unwrap();
    h.ledger.reject(Some("prepare-upgrade"));
    coordinator.submit_transactions(&update("node2")).await.unwrap_err();

    let err = coordinator.prepare(&update("node3")).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            phase: Phase::Prepare,
            rerun_from: Phase::SubmitTransactions,
            ..
        }
    ));
    let staged = artifacts(&h)
        .read_prepared(NodeOperation::Update, Phase::Execute)
        .unwrap();
    assert_eq!(staged.node_name, "node2");
}

#[tokio::test]
async fn prepare_after_execute_starts_a_new_operation() {
    let h = Harness::new();
    h.seed(1).await;
    h.orchestration.freeze_all();
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.run_all(&request).await.unwrap();

    let next = coordinator.prepare(&request).await.unwrap();
    assert_eq!(next.node_id, 3);
    assert!(artifacts(&h)
        .read_receipts(NodeOperation::Add)
        .unwrap()
        .is_none());
}

// ============================================================================
// Execute
// ============================================================================

#[tokio::test]
async fn execute_without_receipts_points_back() {
    let h = Harness::new();
    h.seed(1).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();

    let err = coordinator.execute(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseResume {
            phase: Phase::Execute,
            rerun_from: Phase::SubmitTransactions,
            ..
        }
    ));
    assert!(h.orchestration.calls().is_empty());
}

#[tokio::test]
async fn failed_execute_reports_partial_progress_and_resumes() {
    let h = Harness::new();
    h.seed(2).await;
    h.orchestration.freeze_all();
    h.orchestration.set_inactive(true);
    let coordinator = h.coordinator();
    let request = h.request(add());

    let err = coordinator.run_all(&request).await.unwrap_err();
    match &err {
        DeployError::PhaseIncomplete {
            completed, next, ..
        } => {
            assert_eq!(*completed, Phase::SubmitTransactions);
            assert_eq!(*next, Phase::Execute);
        }
        other => panic!("expected PhaseIncomplete, got {:?}", other),
    }
    assert!(err.to_string().contains("re-run execute"));

    let doc = h.load().await;
    assert_eq!(
        doc.components.consensus_node(3).unwrap().metadata.phase,
        DeploymentPhase::Configured
    );
    assert_unlocked(&h).await;

    h.orchestration.set_inactive(false);
    coordinator.execute(&request).await.unwrap();

    let doc = h.load().await;
    assert_eq!(
        doc.components.consensus_node(3).unwrap().metadata.phase,
        DeploymentPhase::Started
    );
    assert_eq!(
        h.orchestration.calls(),
        vec!["apply node3", "configure node3", "start node3", "start node3"]
    );
    assert_eq!(h.ledger.submissions(), 3);

    // Finished operations are not applied twice.
    coordinator.execute(&request).await.unwrap();
    assert_eq!(h.orchestration.calls().len(), 4);
}

#[tokio::test]
async fn execute_resumes_node_recorded_as_requested() {
    let h = Harness::new();
    h.seed(3).await;
    let coordinator = h.coordinator();
    let request = h.request(add());
    let prepared = coordinator.prepare(&request).await.unwrap();

    let locks = h.locks_for("bob");
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "node add node4 (requested)", |doc| {
            doc.components.insert_consensus_node(ConsensusNodeState {
                metadata: ComponentMetadata::new(4, NAMESPACE, CLUSTER, DeploymentPhase::Requested),
                name: "node4".into(),
                block_node_ids: Vec::new(),
            })
        })
        .await
        .unwrap();
    locks.release(&guard).await.unwrap();

    let mut receipts = ReceiptArtifact::new(
        NodeOperation::Add,
        prepared.node_id,
        prepared.upgrade_file_hash.clone(),
    );
    receipts.complete = true;
    artifacts(&h).write_receipts(&receipts).unwrap();

    coordinator.execute(&request).await.unwrap();

    let doc = h.load().await;
    assert_eq!(
        doc.components.consensus_node(4).unwrap().metadata.phase,
        DeploymentPhase::Started
    );
    let commands: Vec<&str> = doc.history.commands.iter().map(String::as_str).collect();
    assert!(commands.contains(&"node add node4 (deployed)"));
    // Network freeze is only awaited before the record is inserted.
    assert_eq!(
        h.orchestration.calls(),
        vec!["apply node4", "configure node4", "start node4"]
    );
    assert!(artifacts(&h)
        .read_receipts(NodeOperation::Add)
        .unwrap()
        .unwrap()
        .executed_at
        .is_some());
    assert_eq!(h.ledger.submissions(), 0);
}

#[tokio::test]
async fn execute_refuses_record_from_another_cluster() {
    let h = Harness::new();
    h.seed(2).await;
    h.orchestration.freeze_all();
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();
    coordinator.submit_transactions(&request).await.unwrap();

    let locks = h.locks_for("bob");
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "node add node3 (requested)", |doc| {
            doc.add_cluster(ClusterRef::new("cluster-b", NAMESPACE, "deploy1"))?;
            doc.components.insert_consensus_node(ConsensusNodeState {
                metadata: ComponentMetadata::new(3, NAMESPACE, "cluster-b", DeploymentPhase::Requested),
                name: "node3".into(),
                block_node_ids: Vec::new(),
            })
        })
        .await
        .unwrap();
    locks.release(&guard).await.unwrap();

    let err = coordinator.execute(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::DuplicateComponent { id: 3, ref cluster, .. } if cluster == "cluster-b"
    ));
    assert!(h.orchestration.calls().is_empty());
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn execute_waits_for_network_freeze() {
    let h = Harness::new();
    h.seed(2).await;
    h.orchestration.freeze("node1");
    let coordinator = h.coordinator();
    let request = h.request(add());
    coordinator.prepare(&request).await.unwrap();
    coordinator.submit_transactions(&request).await.unwrap();

    let err = coordinator.execute(&request).await.unwrap_err();
    assert!(matches!(err, DeployError::RetriesExhausted { ref what, .. } if what == "node2 frozen"));
    assert!(h.load().await.components.consensus_node(3).is_none());
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn update_reconfigures_and_restarts() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();
    let request = h.request(NodeChange::Update {
        node_name: "node2".into(),
        gossip_endpoint: Some("10.0.0.2:50111".into()),
        grpc_endpoint: None,
        rotate_keys: false,
    });

    h.coordinator().run_all(&request).await.unwrap();

    let prepared = artifacts(&h)
        .read_prepared(NodeOperation::Update, Phase::Execute)
        .unwrap();
    assert_eq!(prepared.gossip_endpoint, "10.0.0.2:50111");
    assert!(prepared.keys.is_none());
    assert_eq!(h.keys.generated(), 0);

    let doc = h.load().await;
    let node = doc.components.consensus_node(2).unwrap();
    assert_eq!(node.metadata.phase, DeploymentPhase::Started);
    assert_eq!(node.name, "node2");
    assert_eq!(doc.components.consensus_nodes.len(), 3);
    assert_eq!(
        h.ledger.confirmed(),
        vec!["node-update", "prepare-upgrade", "freeze-upgrade"]
    );
    assert_eq!(h.orchestration.calls(), vec!["configure node2", "start node2"]);
}

#[tokio::test]
async fn update_requires_started_node() {
    let h = Harness::new();
    h.seed(2).await;
    let locks = h.locks_for("bob");
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "network freeze", |doc| {
            doc.components
                .transition(NAMESPACE, ComponentKind::ConsensusNode, 2, DeploymentPhase::Frozen)
                .map(|_| ())
        })
        .await
        .unwrap();
    locks.release(&guard).await.unwrap();

    let err = h
        .coordinator()
        .prepare(&h.request(NodeChange::Update {
            node_name: "node2".into(),
            gossip_endpoint: None,
            grpc_endpoint: None,
            rotate_keys: true,
        }))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::InvalidPhaseTransition {
            id: 2,
            from: DeploymentPhase::Frozen,
            ..
        }
    ));
    assert_eq!(h.keys.generated(), 0);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn delete_removes_node_and_relay_references() {
    let h = Harness::new();
    h.seed(3).await;
    let locks = h.locks_for("bob");
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "relay node add", |doc| {
            doc.components.insert_relay_node(RelayNodeState {
                metadata: ComponentMetadata::new(1, NAMESPACE, CLUSTER, DeploymentPhase::Started),
                consensus_node_ids: vec![1, 3],
            })
        })
        .await
        .unwrap();
    locks.release(&guard).await.unwrap();
    h.orchestration.freeze("node3");

    let request = h.request(NodeChange::Delete {
        node_name: "node3".into(),
    });
    h.coordinator().run_all(&request).await.unwrap();

    let doc = h.load().await;
    assert!(doc.components.consensus_node(3).is_none());
    assert_eq!(doc.components.consensus_nodes.len(), 2);
    assert_eq!(doc.components.relay_nodes[0].consensus_node_ids, vec![1]);
    // Ids are never reused.
    assert_eq!(doc.components.peek_next_id(ComponentKind::ConsensusNode), 4);

    assert_eq!(
        h.ledger.confirmed(),
        vec!["node-delete", "prepare-upgrade", "freeze-upgrade"]
    );
    assert_eq!(h.orchestration.calls(), vec!["remove node3"]);
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn delete_unknown_node_fails_in_prepare() {
    let h = Harness::new();
    h.seed(1).await;

    let err = h
        .coordinator()
        .prepare(&h.request(NodeChange::Delete {
            node_name: "node7".into(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::ComponentNotFound { ref id, .. } if id == "node7"));
}

// ============================================================================
// Upgrade
// ============================================================================

#[tokio::test]
async fn upgrade_restarts_every_started_node() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();
    let coordinator = h.coordinator();
    let request = h.request(upgrade());

    coordinator.run_all(&request).await.unwrap();

    let prepared = artifacts(&h)
        .read_prepared(NodeOperation::Upgrade, Phase::Execute)
        .unwrap();
    assert_eq!(prepared.existing_node_ids, vec![1, 2, 3]);
    assert_eq!(prepared.software_version, Some(semver::Version::new(0, 55, 0)));
    assert_eq!(h.keys.generated(), 0);

    assert_eq!(h.ledger.confirmed(), vec!["prepare-upgrade", "freeze-upgrade"]);
    assert_eq!(
        h.ledger.upgrade_hashes(),
        vec![prepared.upgrade_file_hash.clone(), prepared.upgrade_file_hash.clone()]
    );
    assert_eq!(
        h.orchestration.calls(),
        vec![
            "configure node1",
            "configure node2",
            "configure node3",
            "start node1",
            "start node2",
            "start node3"
        ]
    );

    let doc = h.load().await;
    assert!(doc
        .components
        .consensus_nodes
        .iter()
        .all(|n| n.metadata.phase == DeploymentPhase::Started));
    assert_eq!(
        doc.versions.get(&ComponentKind::ConsensusNode),
        Some(&semver::Version::new(0, 55, 0))
    );
    assert!(doc
        .history
        .commands
        .iter()
        .any(|c| c == "node upgrade node2 (configured)"));
    assert_eq!(
        doc.history.last_executed_command.as_deref(),
        Some("node upgrade node3 (started)")
    );
    assert_unlocked(&h).await;
}

#[tokio::test]
async fn failed_upgrade_resumes_with_remaining_nodes() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();
    h.orchestration.fail_on(Some("start node2"));
    let coordinator = h.coordinator();
    let request = h.request(upgrade());

    let err = coordinator.run_all(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::PhaseIncomplete {
            next: Phase::Execute,
            ..
        }
    ));
    let doc = h.load().await;
    let phases: Vec<DeploymentPhase> = doc
        .components
        .consensus_nodes
        .iter()
        .map(|n| n.metadata.phase)
        .collect();
    assert_eq!(
        phases,
        vec![
            DeploymentPhase::Started,
            DeploymentPhase::Configured,
            DeploymentPhase::Configured
        ]
    );
    let receipts = artifacts(&h)
        .read_receipts(NodeOperation::Upgrade)
        .unwrap()
        .unwrap();
    assert_eq!(receipts.finished_node_ids, vec![1]);

    h.orchestration.fail_on(None);
    coordinator.execute(&request).await.unwrap();

    assert_eq!(
        h.orchestration.calls(),
        vec![
            "configure node1",
            "configure node2",
            "configure node3",
            "start node1",
            "start node2",
            "start node3"
        ]
    );
    assert!(h
        .load()
        .await
        .components
        .consensus_nodes
        .iter()
        .all(|n| n.metadata.phase == DeploymentPhase::Started));
    assert_eq!(h.ledger.submissions(), 2);
}

#[tokio::test]
async fn upgrade_waits_for_frozen_nodes() {
    let h = Harness::new();
    h.seed(2).await;
    h.orchestration.freeze("node2");
    let coordinator = h.coordinator();
    let request = h.request(upgrade());
    coordinator.prepare(&request).await.unwrap();
    coordinator.submit_transactions(&request).await.unwrap();

    let err = coordinator.execute(&request).await.unwrap_err();
    assert!(matches!(err, DeployError::RetriesExhausted { ref what, .. } if what == "node1 frozen"));
    assert!(h.orchestration.calls().is_empty());
    assert!(h
        .load()
        .await
        .components
        .consensus_nodes
        .iter()
        .all(|n| n.metadata.phase == DeploymentPhase::Started));
}

#[tokio::test]
async fn upgrade_needs_a_started_node() {
    let h = Harness::new();
    h.seed(0).await;

    let err = h.coordinator().prepare(&h.request(upgrade())).await.unwrap_err();
    assert!(matches!(err, DeployError::ComponentNotFound { .. }));
    assert!(!artifacts(&h).prepared_path(NodeOperation::Upgrade).exists());
}

// ============================================================================
// Locking and freeze
// ============================================================================

#[tokio::test]
async fn phases_fail_while_namespace_is_locked() {
    let h = Harness::new();
    h.seed(1).await;
    let _guard = h.locks_for("bob").acquire(NAMESPACE).await.unwrap();

    let err = h.coordinator().prepare(&h.request(add())).await.unwrap_err();
    assert!(matches!(err, DeployError::LockHeld { ref holder, .. } if holder.starts_with("bob@")));
}

#[tokio::test]
async fn freeze_network_marks_started_nodes_frozen() {
    let h = Harness::new();
    h.seed(3).await;
    h.orchestration.freeze_all();

    let mut frozen = h.coordinator().freeze_network(NAMESPACE).await.unwrap();
    frozen.sort();
    assert_eq!(frozen, vec!["node1", "node2", "node3"]);

    let doc = h.load().await;
    assert!(doc
        .components
        .consensus_nodes
        .iter()
        .all(|n| n.metadata.phase == DeploymentPhase::Frozen));
    assert_eq!(doc.history.last_executed_command.as_deref(), Some("network freeze"));
    assert_eq!(h.ledger.confirmed(), vec!["freeze"]);
    assert_unlocked(&h).await;
}
