//! Remote configuration store and validator tests.

mod common;

use common::{Harness, CLUSTER, NAMESPACE};
use ledgerdeck::core::error::DeployError;
use ledgerdeck::remote::migration::Versioned;
use ledgerdeck::remote::model::{
    ComponentKind, ComponentMetadata, ConsensusNodeState, DeploymentPhase, CURRENT_SCHEMA_VERSION,
};
use ledgerdeck::remote::{
    remote_config_document_name, RemoteConfigStore, RemoteConfigValidator, ValidationPolicy,
};
use ledgerdeck::store::DocumentStore;
use std::time::Duration;

const LEGACY: &str = r#"
metadata:
  namespace: ns1
  deploymentName: deploy1
  toolVersion: 0.38.0
  platformVersion: v0.54.0
clusters:
  cluster-a:
    name: cluster-a
    namespace: ns1
    deployment: deploy1
components:
  consensusNodes:
    node1:
      name: node1
      nodeId: 0
      namespace: ns1
      cluster: cluster-a
commandHistory:
  - deployment create
  - network deploy
"#;

// ============================================================================
// Create and load
// ============================================================================

#[tokio::test]
async fn create_then_load_round_trips() {
    let h = Harness::new();
    let seeded = h.seed(2).await;

    let loaded = h.remote().load_versioned(NAMESPACE).await.unwrap();
    assert_eq!(loaded.document, seeded);
    assert_eq!(loaded.stored_schema_version, CURRENT_SCHEMA_VERSION);
    assert!(h.remote().exists(NAMESPACE).await.unwrap());
}

#[tokio::test]
async fn load_missing_namespace_fails() {
    let h = Harness::new();
    let err = h.remote().load("ns-missing").await.unwrap_err();
    assert!(matches!(err, DeployError::DocumentNotFound { namespace } if namespace == "ns-missing"));
}

#[tokio::test]
async fn second_create_fails_after_progress() {
    let h = Harness::new();
    h.seed(0).await;
    let locks = h.locks_for("alice");
    let guard = locks.acquire(NAMESPACE).await.unwrap();

    h.remote()
        .modify(&guard, "consensus node add", |doc| {
            doc.components.insert_consensus_node(ConsensusNodeState {
                metadata: ComponentMetadata::new(1, NAMESPACE, CLUSTER, DeploymentPhase::Requested),
                name: "node1".into(),
                block_node_ids: Vec::new(),
            })
        })
        .await
        .unwrap();
    h.remote()
        .modify(&guard, "consensus node deploy", |doc| {
            doc.components
                .transition(NAMESPACE, ComponentKind::ConsensusNode, 1, DeploymentPhase::Deployed)
                .map(|_| ())
        })
        .await
        .unwrap();
    locks.release(&guard).await.unwrap();

    let again = h.seed_document(0);
    let err = h.remote().create(&again).await.unwrap_err();
    assert!(matches!(err, DeployError::AlreadyExists { .. }));

    let doc = h.load().await;
    assert_eq!(doc.components.consensus_nodes[0].metadata.phase, DeploymentPhase::Deployed);
}

// ============================================================================
// Modify
// ============================================================================

#[tokio::test]
async fn modify_records_history_and_stamp() {
    let h = Harness::new();
    h.seed(1).await;
    let locks = h.locks_for("alice");
    let guard = locks.acquire(NAMESPACE).await.unwrap();

    h.clock.advance(Duration::from_secs(3));
    let doc = h
        .remote()
        .modify(&guard, "network freeze", |_| Ok(()))
        .await
        .unwrap();

    assert_eq!(doc.history.last_executed_command.as_deref(), Some("network freeze"));
    assert_eq!(doc.metadata.last_updated_by.name, "alice");
    assert_eq!(doc.metadata.last_updated_at, common::epoch() + chrono::Duration::seconds(3));
    assert_eq!(h.load().await, doc);
}

#[tokio::test]
async fn history_is_bounded() {
    let h = Harness::new();
    h.seed(0).await;
    let remote = RemoteConfigStore::new(h.store(), h.clock(), 3);
    let locks = h.locks_for("alice");
    let guard = locks.acquire(NAMESPACE).await.unwrap();

    for i in 1..=5 {
        remote
            .modify(&guard, &format!("command {}", i), |_| Ok(()))
            .await
            .unwrap();
    }

    let doc = remote.load(NAMESPACE).await.unwrap();
    let commands: Vec<&str> = doc.history.commands.iter().map(String::as_str).collect();
    assert_eq!(commands, vec!["command 3", "command 4", "command 5"]);
}

#[tokio::test]
async fn failed_mutation_writes_nothing() {
    let h = Harness::new();
    h.seed(1).await;
    let before = h.store.get(&remote_config_document_name(NAMESPACE)).await.unwrap().unwrap();
    let guard = h.locks_for("alice").acquire(NAMESPACE).await.unwrap();

    let err = h
        .remote()
        .modify(&guard, "bad transition", |doc| {
            doc.components
                .transition(NAMESPACE, ComponentKind::ConsensusNode, 1, DeploymentPhase::Requested)
                .map(|_| ())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidPhaseTransition { .. }));

    let after = h.store.get(&remote_config_document_name(NAMESPACE)).await.unwrap().unwrap();
    assert_eq!(after.version, before.version);
}

#[tokio::test]
async fn modify_requires_valid_lock() {
    let h = Harness::new();
    h.seed(1).await;
    let locks = h.locks_for("alice");
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    locks.release(&guard).await.unwrap();

    let err = h
        .remote()
        .modify(&guard, "late write", |_| Ok(()))
        .await
        .unwrap_err();
    assert!(err.is_lock_failure());

    // Expired locally.
    let guard = locks.acquire(NAMESPACE).await.unwrap();
    h.clock.advance(Duration::from_secs(21));
    let err = h
        .remote()
        .modify(&guard, "late write", |_| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::LockExpired { .. }));
    assert!(h.load().await.history.last_executed_command.is_none());
}

// ============================================================================
// Migration through the store
// ============================================================================

#[tokio::test]
async fn legacy_document_migrates_on_first_write() {
    let h = Harness::new();
    let name = remote_config_document_name(NAMESPACE);
    h.store.create(&name, LEGACY.as_bytes().to_vec()).await.unwrap();

    let loaded = h.remote().load_versioned(NAMESPACE).await.unwrap();
    assert_eq!(loaded.stored_schema_version, 0);
    assert_eq!(loaded.document.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(loaded.document.components.consensus_nodes[0].metadata.id, 1);

    let guard = h.locks_for("alice").acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "deployment migrate", |_| Ok(()))
        .await
        .unwrap();

    let stored = h.store.get(&name).await.unwrap().unwrap();
    assert_eq!(
        Versioned::decode(&stored.bytes).unwrap().schema_version(),
        CURRENT_SCHEMA_VERSION
    );
    let doc = h.load().await;
    let commands: Vec<&str> = doc.history.commands.iter().map(String::as_str).collect();
    assert_eq!(
        commands,
        vec!["deployment create", "network deploy", "deployment migrate"]
    );
}

#[tokio::test]
async fn save_refuses_schema_downgrade() {
    let h = Harness::new();
    h.seed(1).await;
    let guard = h.locks_for("alice").acquire(NAMESPACE).await.unwrap();

    let mut loaded = h.remote().load_versioned(NAMESPACE).await.unwrap();
    loaded.document.schema_version = CURRENT_SCHEMA_VERSION - 1;
    let err = h.remote().save(&guard, &loaded).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::SchemaDowngrade { stored, attempted, .. }
            if stored == CURRENT_SCHEMA_VERSION && attempted == CURRENT_SCHEMA_VERSION - 1
    ));

    let err = h
        .remote()
        .modify(&guard, "downgrade", |doc| {
            doc.schema_version = 1;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::SchemaDowngrade { .. }));
    assert_eq!(h.load().await.schema_version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn save_of_stale_document_conflicts() {
    let h = Harness::new();
    h.seed(1).await;
    let stale = h.remote().load_versioned(NAMESPACE).await.unwrap();

    let bob = h.locks_for("bob");
    let guard = bob.acquire(NAMESPACE).await.unwrap();
    h.remote()
        .modify(&guard, "network freeze", |doc| {
            doc.components
                .transition(NAMESPACE, ComponentKind::ConsensusNode, 1, DeploymentPhase::Frozen)
                .map(|_| ())
        })
        .await
        .unwrap();
    bob.release(&guard).await.unwrap();

    let alice = h.locks_for("alice");
    let guard = alice.acquire(NAMESPACE).await.unwrap();
    let err = h.remote().save(&guard, &stale).await.unwrap_err();
    assert!(matches!(err, DeployError::Conflict { .. }));

    let doc = h.load().await;
    assert_eq!(doc.components.consensus_nodes[0].metadata.phase, DeploymentPhase::Frozen);
    assert_eq!(doc.history.last_executed_command.as_deref(), Some("network freeze"));

    // Reloading under the lock picks up the newer document.
    let fresh = h.remote().load_versioned(NAMESPACE).await.unwrap();
    h.remote().save(&guard, &fresh).await.unwrap();
}

#[tokio::test]
async fn newer_stored_schema_is_unsupported() {
    let h = Harness::new();
    h.store
        .create(
            &remote_config_document_name(NAMESPACE),
            format!("schemaVersion: {}\n", CURRENT_SCHEMA_VERSION + 1).into_bytes(),
        )
        .await
        .unwrap();

    let err = h.remote().load(NAMESPACE).await.unwrap_err();
    assert!(matches!(err, DeployError::UnsupportedSchemaVersion { .. }));
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn validation_names_missing_started_node() {
    let h = Harness::new();
    let doc = h.seed(3).await;
    h.orchestration.remove_pod("node2");
    let validator = RemoteConfigValidator::new(h.orchestration.clone());

    let err = validator
        .validate(&doc, &ValidationPolicy::strict())
        .await
        .unwrap_err();
    match err {
        DeployError::Validation { kind, id, name, .. } => {
            assert_eq!(kind, ComponentKind::ConsensusNode);
            assert_eq!(id, 2);
            assert_eq!(name, "node2");
        }
        other => panic!("expected Validation, got {:?}", other),
    }

    validator
        .validate(&doc, &ValidationPolicy::disabled())
        .await
        .unwrap();
    validator
        .validate(&doc, &ValidationPolicy::skipping([ComponentKind::ConsensusNode]))
        .await
        .unwrap();
}

#[tokio::test]
async fn validation_skips_frozen_and_stopped() {
    let h = Harness::new();
    h.seed(2).await;
    let guard = h.locks_for("alice").acquire(NAMESPACE).await.unwrap();
    let doc = h
        .remote()
        .modify(&guard, "network freeze", |doc| {
            doc.components
                .transition(NAMESPACE, ComponentKind::ConsensusNode, 2, DeploymentPhase::Frozen)
                .map(|_| ())
        })
        .await
        .unwrap();
    h.orchestration.remove_pod("node2");

    let validator = RemoteConfigValidator::new(h.orchestration.clone());
    validator
        .validate(&doc, &ValidationPolicy::strict())
        .await
        .unwrap();
}
