//! Hierarchical named-blob storage
//!
//! Everything normscope persists goes through [`BlobStore`]: checkpoints, the
//! manifest, the latest-run view and norm summaries. Keys are relative paths
//! (`checkpoints/manifest.json`); implementations decide where they live.

mod memory;

pub use memory::MemoryBlobStore;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Common interface for blob backends
pub trait BlobStore: Send + Sync {
    /// Name of this backend (for logging)
    fn name(&self) -> &str;

    /// Check whether a blob or directory exists at `key`
    fn exists(&self, key: &Path) -> bool;

    /// Read the full contents of a blob
    fn read(&self, key: &Path) -> io::Result<Vec<u8>>;

    /// Replace the contents of a blob
    fn write(&self, key: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Create a directory and any missing parents
    fn mkdir(&self, key: &Path) -> io::Result<()>;
}

/// Reject keys that could escape the store root
pub(crate) fn check_key(key: &Path) -> io::Result<()> {
    let escapes = key
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("blob key must be relative: {}", key.display()),
        ));
    }
    Ok(())
}

/// Blob store rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &Path) -> io::Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "fs"
    }

    fn exists(&self, key: &Path) -> bool {
        self.resolve(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn read(&self, key: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(key)?)
    }

    fn write(&self, key: &Path, bytes: &[u8]) -> io::Result<()> {
        let path = self.resolve(key)?;

        // Write to temp file first, then rename (atomic on POSIX)
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(bytes)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn mkdir(&self, key: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(key)?)
    }
}
