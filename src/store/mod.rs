//! Document store adapter.
//!
//! Both the namespace lock record and the remote configuration document live
//! in an external key-value document store addressed by name. Every mutation
//! is a single-document compare-and-replace keyed on the version returned by
//! the last read, so two writers can never interleave partial updates.
//!
//! - [`memory`] - In-process store used by tests and dry runs
//! - [`file`] - Directory-backed store used by the operator CLI

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

/// A stored document together with its store-assigned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Raw document bytes.
    pub bytes: Vec<u8>,
    /// Version assigned by the store; bumped on every write.
    pub version: u64,
}

/// Errors returned by document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document '{name}' not found")]
    NotFound { name: String },

    /// The document already exists.
    #[error("document '{name}' already exists")]
    AlreadyExists { name: String },

    /// The stored version did not match the expected version.
    #[error("version conflict on '{name}': expected {expected:?}, found {actual:?}")]
    Conflict {
        name: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Backend failure.
    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Create a Backend error.
    pub fn backend(message: impl ToString) -> Self {
        Self::Backend {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::backend(err)
    }
}

/// Result type using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Named-document storage with optimistic concurrency.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. Absence is `Ok(None)`.
    async fn get(&self, name: &str) -> StoreResult<Option<StoredDocument>>;

    /// Create a document, failing with `AlreadyExists` if present.
    async fn create(&self, name: &str, bytes: Vec<u8>) -> StoreResult<u64>;

    /// Replace a document.
    ///
    /// With `expected = Some(v)` the write only succeeds if the stored version
    /// is still `v`; otherwise it fails with `Conflict`. With `None` the write
    /// is unconditional but the document must exist.
    async fn replace(&self, name: &str, bytes: Vec<u8>, expected: Option<u64>)
        -> StoreResult<u64>;

    /// Delete a document.
    ///
    /// Deleting an absent document is a no-op when `expected` is `None`.
    async fn delete(&self, name: &str, expected: Option<u64>) -> StoreResult<()>;
}

/// Check a compare-and-replace precondition against the stored version.
pub(crate) fn check_expected(
    name: &str,
    expected: Option<u64>,
    actual: Option<u64>,
) -> StoreResult<()> {
    match (expected, actual) {
        (None, _) => Ok(()),
        (Some(e), Some(a)) if e == a => Ok(()),
        (expected, actual) => Err(StoreError::Conflict {
            name: name.to_string(),
            expected,
            actual,
        }),
    }
}
