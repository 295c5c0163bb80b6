//! Directory-backed document store.
//!
//! Each document is one file under the store root holding a version header
//! line followed by the raw payload. Writers serialize on an advisory
//! `fs2` lock per document and publish through a temp file + rename, so a
//! crashed writer never leaves a torn document behind.

use super::{check_expected, DocumentStore, StoreError, StoreResult, StoredDocument};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const VERSION_HEADER: &str = "ledgerdeck-document-version: ";
const DOCUMENT_EXT: &str = "doc";
const LOCK_DIR: &str = ".locks";

/// Document store persisting one file per document.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(LOCK_DIR))?;
        Ok(Self { root })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", escape_name(name), DOCUMENT_EXT))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root
            .join(LOCK_DIR)
            .join(format!("{}.lock", escape_name(name)))
    }

    /// Run `op` on the document path while holding its exclusive file lock.
    async fn locked<T, F>(&self, name: &str, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> StoreResult<T> + Send + 'static,
    {
        let document_path = self.document_path(name);
        let lock_path = self.lock_path(name);

        tokio::task::spawn_blocking(move || {
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&lock_file)?;
            let result = op(&document_path);
            if let Err(e) = FileExt::unlock(&lock_file) {
                tracing::warn!(path = %lock_path.display(), error = %e, "failed to unlock document");
            }
            result
        })
        .await
        .map_err(|e| StoreError::backend(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, name: &str) -> StoreResult<Option<StoredDocument>> {
        self.locked(name, read_document).await
    }

    async fn create(&self, name: &str, bytes: Vec<u8>) -> StoreResult<u64> {
        let owned = name.to_string();
        self.locked(name, move |path| {
            if read_document(path)?.is_some() {
                return Err(StoreError::AlreadyExists { name: owned });
            }
            write_document(path, &bytes, 1)?;
            Ok(1)
        })
        .await
    }

    async fn replace(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let owned = name.to_string();
        self.locked(name, move |path| {
            let current = read_document(path)?.ok_or_else(|| StoreError::NotFound {
                name: owned.clone(),
            })?;
            check_expected(&owned, expected, Some(current.version))?;
            let version = current.version + 1;
            write_document(path, &bytes, version)?;
            Ok(version)
        })
        .await
    }

    async fn delete(&self, name: &str, expected: Option<u64>) -> StoreResult<()> {
        let owned = name.to_string();
        self.locked(name, move |path| {
            let actual = read_document(path)?.map(|doc| doc.version);
            check_expected(&owned, expected, actual)?;
            match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

/// Map a document name onto a single path component.
fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn read_document(path: &Path) -> StoreResult<Option<StoredDocument>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = || StoreError::backend(format!("corrupt document file: {}", path.display()));
    let newline = raw.iter().position(|b| *b == b'\n').ok_or_else(corrupt)?;
    let header = std::str::from_utf8(&raw[..newline]).map_err(|_| corrupt())?;
    let version = header
        .strip_prefix(VERSION_HEADER)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(corrupt)?;

    Ok(Some(StoredDocument {
        bytes: raw[newline + 1..].to_vec(),
        version,
    }))
}

fn write_document(path: &Path, bytes: &[u8], version: u64) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(format!("{}{}\n", VERSION_HEADER, version).as_bytes())?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::from(e.error))?;
    Ok(())
}
