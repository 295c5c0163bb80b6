//! Per-invocation wiring.
//!
//! A [`DeploymentContext`] owns the validated configuration, the document
//! store backend, the clock and the lock holder identity for one command
//! invocation. Lock managers, remote config stores and lifecycle
//! coordinators are built from it on demand; nothing here is process-global.

use crate::adapters::{KeyMaterialProvider, LedgerClient, OrchestrationClient};
use crate::core::config::Config;
use crate::core::time::{Clock, SystemClock};
use crate::lifecycle::{LifecycleSettings, NodeLifecycleCoordinator};
use crate::lock::{LockHolder, LockManager};
use crate::remote::{RemoteConfigStore, RemoteConfigValidator};
use crate::store::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs to talk to one document store.
#[derive(Clone)]
pub struct DeploymentContext {
    /// Configuration.
    config: Arc<Config>,

    /// Backend holding lock records and remote config documents.
    store: Arc<dyn DocumentStore>,

    /// Time source for lock expiry and document stamps.
    clock: Arc<dyn Clock>,

    /// Identity locks are acquired as.
    holder: LockHolder,
}

impl DeploymentContext {
    /// Create a context from configuration, opening the configured store.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let store = open_store(&config)?;
        let holder = LockHolder::current();
        tracing::debug!(
            backend = %config.store.backend,
            holder = %holder,
            "deployment context initialized"
        );
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(SystemClock),
            holder,
        ))
    }

    /// Create a context from explicit parts.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        holder: LockHolder,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
            holder,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the document store.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Get the clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Get the lock holder identity.
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Handoff directory shared by lifecycle phases.
    pub fn handoff_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.lifecycle.handoff_dir)
    }

    /// Build a lock manager.
    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(
            self.store(),
            self.clock(),
            self.holder.clone(),
            self.config.lock_settings(),
        )
    }

    /// Build a remote config store.
    pub fn remote_store(&self) -> RemoteConfigStore {
        RemoteConfigStore::new(
            self.store(),
            self.clock(),
            self.config.remote_config.max_command_history,
        )
    }

    /// Build a validator backed by `orchestration`.
    pub fn validator(&self, orchestration: Arc<dyn OrchestrationClient>) -> RemoteConfigValidator {
        RemoteConfigValidator::new(orchestration)
    }

    /// Build a lifecycle coordinator from the given collaborators.
    pub fn coordinator(
        &self,
        orchestration: Arc<dyn OrchestrationClient>,
        ledger: Arc<dyn LedgerClient>,
        keys: Arc<dyn KeyMaterialProvider>,
    ) -> NodeLifecycleCoordinator {
        NodeLifecycleCoordinator::new(
            self.lock_manager(),
            self.remote_store(),
            orchestration,
            ledger,
            keys,
            self.clock(),
            LifecycleSettings::from_config(&self.config),
        )
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!("using in-memory store, state is lost on exit");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        _ => {
            let root = Path::new(&config.store.root);
            let store = FileDocumentStore::open(root).with_context(|| {
                format!("failed to open document store at {}", root.display())
            })?;
            tracing::debug!(root = %root.display(), "file document store opened");
            Ok(Arc::new(store))
        }
    }
}
