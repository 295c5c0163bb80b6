//! Remote configuration store.
//!
//! Loads documents through the migration chain and persists them with a
//! single compare-and-replace keyed on the version that was read. Every
//! write requires a valid [`LockGuard`] for the document's namespace.

use super::migration::{encode, migrate_document, MigrationContext};
use super::model::{RemoteConfigDocument, CURRENT_SCHEMA_VERSION};
use crate::core::error::{DeployError, DeployResult};
use crate::core::time::Clock;
use crate::lock::LockGuard;
use crate::store::{DocumentStore, StoreError};
use std::sync::Arc;

/// Document name holding the remote configuration for a namespace.
pub fn remote_config_document_name(namespace: &str) -> String {
    format!("remote-config/{}", namespace)
}

/// A loaded document with the store version it was read at.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: RemoteConfigDocument,
    /// Store version used for compare-and-replace.
    pub version: u64,
    /// Schema version the document was stored at.
    pub stored_schema_version: u32,
}

/// Reads and writes remote configuration documents.
#[derive(Clone)]
pub struct RemoteConfigStore {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    max_command_history: usize,
}

impl RemoteConfigStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        max_command_history: usize,
    ) -> Self {
        Self {
            store,
            clock,
            max_command_history: max_command_history.max(1),
        }
    }

    /// Bound applied to the command history on every write.
    pub fn max_command_history(&self) -> usize {
        self.max_command_history
    }

    fn migration_context(&self) -> MigrationContext {
        MigrationContext::new(self.clock.now())
    }

    /// Check whether a document exists for `namespace`.
    pub async fn exists(&self, namespace: &str) -> DeployResult<bool> {
        Ok(self
            .store
            .get(&remote_config_document_name(namespace))
            .await?
            .is_some())
    }

    /// Load and migrate the document for `namespace`.
    pub async fn load(&self, namespace: &str) -> DeployResult<RemoteConfigDocument> {
        Ok(self.load_versioned(namespace).await?.document)
    }

    /// Load and migrate, keeping the store version for a later replace.
    pub async fn load_versioned(&self, namespace: &str) -> DeployResult<LoadedDocument> {
        let name = remote_config_document_name(namespace);
        let stored = self
            .store
            .get(&name)
            .await?
            .ok_or_else(|| DeployError::DocumentNotFound {
                namespace: namespace.to_string(),
            })?;

        let migrated = migrate_document(&stored.bytes, &self.migration_context())?;
        if migrated.was_migrated() {
            tracing::info!(
                namespace,
                from = migrated.from_version,
                to = CURRENT_SCHEMA_VERSION,
                "migrated remote config on load"
            );
        }

        Ok(LoadedDocument {
            document: migrated.document,
            version: stored.version,
            stored_schema_version: migrated.from_version,
        })
    }

    /// Create the document for a new deployment.
    ///
    /// Fails with `AlreadyExists` if the namespace already has one.
    pub async fn create(&self, initial: &RemoteConfigDocument) -> DeployResult<u64> {
        if initial.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(DeployError::SchemaDowngrade {
                namespace: initial.namespace().to_string(),
                stored: CURRENT_SCHEMA_VERSION,
                attempted: initial.schema_version,
            });
        }
        let name = remote_config_document_name(initial.namespace());
        let version = self.store.create(&name, encode(initial)?).await?;
        tracing::info!(
            namespace = %initial.namespace(),
            deployment = %initial.metadata.deployment_name,
            "created remote config"
        );
        Ok(version)
    }

    /// Apply `mutate` to the namespace's document and persist it atomically.
    ///
    /// The command is appended to the history and the last-updated fields
    /// are stamped with the lock holder. The write fails with `Conflict` if
    /// the document changed since it was read; nothing is written when
    /// `mutate` fails.
    pub async fn modify<F>(
        &self,
        guard: &LockGuard,
        command: &str,
        mutate: F,
    ) -> DeployResult<RemoteConfigDocument>
    where
        F: FnOnce(&mut RemoteConfigDocument) -> DeployResult<()>,
    {
        guard.ensure_valid()?;
        let namespace = guard.namespace();
        let loaded = self.load_versioned(namespace).await?;
        let mut document = loaded.document;

        mutate(&mut document)?;

        if document.namespace() != namespace {
            return Err(DeployError::Store {
                message: format!(
                    "document namespace changed from '{}' to '{}'",
                    namespace,
                    document.namespace()
                ),
            });
        }
        if document.schema_version < CURRENT_SCHEMA_VERSION {
            return Err(DeployError::SchemaDowngrade {
                namespace: namespace.to_string(),
                stored: CURRENT_SCHEMA_VERSION,
                attempted: document.schema_version,
            });
        }

        document
            .history
            .push(command, self.max_command_history);
        document.stamp(guard.holder().updated_by(), self.clock.now());

        self.write(guard, &document, loaded.version).await?;
        tracing::debug!(namespace, command, "modified remote config");
        Ok(document)
    }

    /// Replace the namespace's document with a previously loaded one.
    ///
    /// The replace is keyed on the store version `loaded` was read at, so
    /// any write made since then fails the save with `Conflict`. Refuses to
    /// lower the schema version.
    pub async fn save(&self, guard: &LockGuard, loaded: &LoadedDocument) -> DeployResult<()> {
        guard.ensure_valid()?;
        let namespace = guard.namespace();
        let document = &loaded.document;
        if document.namespace() != namespace {
            return Err(DeployError::Store {
                message: format!(
                    "lock is for namespace '{}' but document is for '{}'",
                    namespace,
                    document.namespace()
                ),
            });
        }

        let floor = loaded.stored_schema_version.max(CURRENT_SCHEMA_VERSION);
        if document.schema_version < floor {
            return Err(DeployError::SchemaDowngrade {
                namespace: namespace.to_string(),
                stored: floor,
                attempted: document.schema_version,
            });
        }

        let mut document = document.clone();
        document.stamp(guard.holder().updated_by(), self.clock.now());
        self.write(guard, &document, loaded.version).await
    }

    async fn write(
        &self,
        guard: &LockGuard,
        document: &RemoteConfigDocument,
        expected: u64,
    ) -> DeployResult<()> {
        let bytes = encode(document)?;
        // The lock may have lapsed while the caller was working.
        guard.ensure_valid()?;
        let name = remote_config_document_name(guard.namespace());
        match self.store.replace(&name, bytes, Some(expected)).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(DeployError::DocumentNotFound {
                namespace: guard.namespace().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
