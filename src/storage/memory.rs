//! In-memory blob store
//!
//! Used by tests and by callers that want to replay history without touching
//! disk. Clones share the same underlying maps.

use super::{check_key, BlobStore};
use dashmap::{DashMap, DashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<PathBuf, Arc<Vec<u8>>>>,
    dirs: Arc<DashSet<PathBuf>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a blob; returns whether it existed
    pub fn remove(&self, key: &Path) -> bool {
        self.blobs.remove(key).is_some()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn exists(&self, key: &Path) -> bool {
        self.blobs.contains_key(key) || self.dirs.contains(key)
    }

    fn read(&self, key: &Path) -> io::Result<Vec<u8>> {
        check_key(key)?;
        self.blobs
            .get(key)
            .map(|b| b.value().to_vec())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no blob at {}", key.display()),
                )
            })
    }

    fn write(&self, key: &Path, bytes: &[u8]) -> io::Result<()> {
        check_key(key)?;
        self.blobs
            .insert(key.to_path_buf(), Arc::new(bytes.to_vec()));
        Ok(())
    }

    fn mkdir(&self, key: &Path) -> io::Result<()> {
        check_key(key)?;
        for ancestor in key.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
}
