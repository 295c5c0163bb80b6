//! Core infrastructure tests.

mod common;

use common::{config_file, holder};
use ledgerdeck::core::config::{
    Config, ConfigOverrides, LOCK_DURATION_ENV, MAX_LOCK_DURATION_SECONDS,
};
use ledgerdeck::core::context::DeploymentContext;
use ledgerdeck::core::error::DeployError;
use ledgerdeck::core::time::{Clock, ManualClock};
use ledgerdeck::lifecycle::Phase;
use ledgerdeck::remote::model::ComponentKind;
use ledgerdeck::store::MemoryDocumentStore;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_empty_config_uses_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.store.backend, "file");
    assert_eq!(config.store.root, "state");
    assert_eq!(config.remote_config.max_command_history, 50);
    assert_eq!(config.lifecycle.handoff_dir, "handoff");
    assert_eq!(config.lifecycle.receipt_attempts, 600);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn parse_full_config_file() {
    let file = config_file(
        r#"
[store]
backend = "memory"

[lock]
acquire_attempts = 3
acquire_delay_ms = 250
auto_renew = false

[remote_config]
max_command_history = 10

[lifecycle]
handoff_dir = "/var/lib/ledgerdeck/handoff"
receipt_attempts = 5
receipt_delay_ms = 100
ready_attempts = 7
ready_delay_ms = 200

[telemetry]
log_level = "debug"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.store.backend, "memory");
    assert!(!config.lock.auto_renew);
    assert_eq!(config.remote_config.max_command_history, 10);

    let acquire = config.lock_acquire_policy();
    assert_eq!(acquire.attempts, 3);
    assert_eq!(acquire.delay, Duration::from_millis(250));
    assert_eq!(config.receipt_policy().attempts, 5);
    assert_eq!(config.ready_policy().delay, Duration::from_millis(200));
}

#[test]
fn validate_rejects_unknown_backend() {
    let result = Config::from_toml("[store]\nbackend = \"etcd\"\n");
    assert!(result.unwrap_err().to_string().contains("store.backend"));
}

#[test]
fn validate_rejects_short_lock_duration() {
    let mut config = Config::default();
    config.lock.duration_seconds = 1;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("lock.duration_seconds"));
}

#[test]
fn validate_rejects_oversized_lock_duration() {
    let mut config = Config::default();
    config.lock.duration_seconds = MAX_LOCK_DURATION_SECONDS;
    config.validate().unwrap();

    config.lock.duration_seconds = 10_000_000_000_000_000;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("lock.duration_seconds must be <="));
}

#[test]
fn validate_rejects_zero_history() {
    let result = Config::from_toml("[remote_config]\nmax_command_history = 0\n");
    assert!(result.is_err());
}

#[test]
fn validate_rejects_bad_log_level() {
    let result = Config::from_toml("[telemetry]\nlog_level = \"loud\"\n");
    assert!(result.unwrap_err().to_string().contains("log_level"));
}

#[test]
fn overrides_replace_file_values() {
    let mut config = Config::default();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("trace".into()),
        store_root: Some("/tmp/ledgerdeck".into()),
        handoff_dir: None,
        lock_duration_seconds: Some(60),
    });
    assert_eq!(config.telemetry.log_level, "trace");
    assert_eq!(config.store.root, "/tmp/ledgerdeck");
    assert_eq!(config.lifecycle.handoff_dir, "handoff");

    let settings = config.lock_settings();
    assert_eq!(settings.duration_seconds, 60);
    assert_eq!(settings.renewal_interval(), Duration::from_secs(30));
}

#[test]
fn lock_duration_env_override() {
    std::env::set_var(LOCK_DURATION_ENV, "45");
    let config = Config::from_toml("");
    std::env::remove_var(LOCK_DURATION_ENV);
    assert_eq!(config.unwrap().lock.duration_seconds, 45);
}

// ============================================================================
// Context tests
// ============================================================================

#[tokio::test]
async fn context_builds_components_from_parts() {
    let clock = ManualClock::new(common::epoch());
    let ctx = DeploymentContext::with_parts(
        Config::default(),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(clock.clone()),
        holder("alice"),
    );

    assert_eq!(ctx.holder().username, "alice");
    assert_eq!(ctx.clock().now(), common::epoch());
    assert_eq!(ctx.handoff_dir(), std::path::PathBuf::from("handoff"));

    let locks = ctx.lock_manager();
    let guard = locks.acquire("ns1").await.unwrap();
    assert!(locks.is_held("ns1").await.unwrap());
    locks.release(&guard).await.unwrap();
    assert!(!locks.is_held("ns1").await.unwrap());
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_messages_name_the_subject() {
    let err = DeployError::lock_held("ns1", "bob@host (pid 1, session x)");
    assert!(err.to_string().contains("ns1"));
    assert!(err.to_string().contains("bob@host"));

    let err = DeployError::Validation {
        kind: ComponentKind::ConsensusNode,
        id: 2,
        name: "node2".into(),
        reason: "not found".into(),
    };
    assert!(err.to_string().contains("node2"));

    let err = DeployError::PhaseResume {
        phase: Phase::Execute,
        path: "/tmp/node-add-receipt.json".into(),
        reason: "artifact not found".into(),
        rerun_from: Phase::SubmitTransactions,
    };
    assert!(err.to_string().contains("submit-transactions"));
}
