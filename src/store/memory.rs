//! In-memory document store.

use super::{check_expected, DocumentStore, StoreError, StoreResult, StoredDocument};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Document store backed by a shared in-process map.
///
/// Clones share the same map, so several lock managers built over clones
/// contend exactly as separate processes would against a remote store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Arc<Mutex<HashMap<String, StoredDocument>>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    /// Names of all stored documents, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.documents.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, name: &str) -> StoreResult<Option<StoredDocument>> {
        Ok(self.documents.lock().get(name).cloned())
    }

    async fn create(&self, name: &str, bytes: Vec<u8>) -> StoreResult<u64> {
        let mut documents = self.documents.lock();
        if documents.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                name: name.to_string(),
            });
        }
        documents.insert(name.to_string(), StoredDocument { bytes, version: 1 });
        Ok(1)
    }

    async fn replace(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let mut documents = self.documents.lock();
        let current = documents.get_mut(name).ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
        })?;
        check_expected(name, expected, Some(current.version))?;
        current.bytes = bytes;
        current.version += 1;
        Ok(current.version)
    }

    async fn delete(&self, name: &str, expected: Option<u64>) -> StoreResult<()> {
        let mut documents = self.documents.lock();
        let actual = documents.get(name).map(|doc| doc.version);
        check_expected(name, expected, actual)?;
        documents.remove(name);
        Ok(())
    }
}
