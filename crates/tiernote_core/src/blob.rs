//! Blob store collaborator contract and local implementations.
//!
//! # Responsibility
//! - Define the non-transactional blob store seam used by storage accounting.
//! - Provide in-memory and directory-backed stores for tests and local runs.
//!
//! # Invariants
//! - `put` reports success or failure unambiguously; a failed `put` leaves
//!   no readable blob behind.
//! - `delete` of a missing key is an error so callers can tell the cases
//!   apart after an `exists` check.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Blob store failures.
#[derive(Debug)]
pub enum BlobError {
    /// Key does not exist.
    Missing(String),
    /// Key is empty or escapes the store namespace.
    InvalidKey(String),
    /// Upload/delete failed or timed out.
    Io(String),
}

impl Display for BlobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "blob not found: {key}"),
            Self::InvalidKey(key) => write!(f, "invalid blob key: `{key}`"),
            Self::Io(message) => write!(f, "blob store failure: {message}"),
        }
    }
}

impl Error for BlobError {}

impl From<io::Error> for BlobError {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// External blob storage, not transactional with the metadata store.
pub trait BlobStore: Send + Sync {
    /// Writes the full payload under `key`.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;
    /// Returns whether `key` currently exists.
    fn exists(&self, key: &str) -> Result<bool, BlobError>;
    /// Removes `key`.
    fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Process-local blob store.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the payload stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map is still structurally valid.
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        validate_blob_key(key)?;
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        validate_blob_key(key)?;
        Ok(self.lock().contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_blob_key(key)?;
        match self.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(BlobError::Missing(key.to_string())),
        }
    }
}

/// Directory-backed blob store; keys map to relative file paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates the store, creating `root` when missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_blob_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a failed upload never leaves a partial blob.
        let staging = path.with_extension("partial");
        if let Err(err) = fs::write(&staging, bytes).and_then(|()| fs::rename(&staging, &path)) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::Missing(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_blob_key(key: &str) -> Result<(), BlobError> {
    let escapes = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if key.trim().is_empty() || key.starts_with('/') || key.contains('\\') || escapes {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{BlobError, BlobStore, FsBlobStore, InMemoryBlobStore};

    #[test]
    fn in_memory_store_round_trips_and_reports_missing() {
        let store = InMemoryBlobStore::new();
        store.put("files/a", b"abc").expect("put");
        assert!(store.exists("files/a").expect("exists"));
        assert_eq!(store.get("files/a").as_deref(), Some(&b"abc"[..]));

        store.delete("files/a").expect("delete");
        assert!(store.is_empty());
        assert!(matches!(
            store.delete("files/a"),
            Err(BlobError::Missing(_))
        ));
    }

    #[test]
    fn rejects_keys_that_escape_namespace() {
        let store = InMemoryBlobStore::new();
        for key in ["", "/abs", "../up", "a//b", "a\\b"] {
            assert!(matches!(
                store.put(key, b"x"),
                Err(BlobError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn fs_store_writes_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::open(dir.path().join("blobs")).expect("open");
        store.put("files/one.bin", b"payload").expect("put");
        assert!(store.exists("files/one.bin").expect("exists"));
        assert!(dir.path().join("blobs/files/one.bin").is_file());

        store.delete("files/one.bin").expect("delete");
        assert!(!store.exists("files/one.bin").expect("exists"));
        assert!(matches!(
            store.delete("files/one.bin"),
            Err(BlobError::Missing(_))
        ));
    }
}
