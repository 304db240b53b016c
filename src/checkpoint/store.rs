//! Checkpoint persistence
//!
//! The store is the only writer of checkpoint bodies, the manifest and the
//! latest-run view for its location. Writes are a sequential critical
//! section; there is no cross-process locking, so two writers pointed at the
//! same location will race on the manifest.

use super::{
    checkpoint_id, fingerprint, is_valid_checkpoint_id, AuditRecord, Checkpoint, CheckpointDelta,
    CheckpointError, CheckpointManifest, CheckpointMetadata, AUDIT_SCHEMA_VERSION,
    CHECKPOINT_SCHEMA_VERSION, MANIFEST_SCHEMA_VERSION,
};
use crate::clock::Clock;
use crate::findings::FindingsGroup;
use crate::models::Attribution;
use crate::storage::BlobStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CHECKPOINTS_DIR: &str = "checkpoints";
const MANIFEST_FILE: &str = "manifest.json";
const AUDIT_FILE: &str = "audit.json";

/// Reads and writes audit history under one output location
#[derive(Clone)]
pub struct CheckpointStore {
    storage: Arc<dyn BlobStore>,
    location: PathBuf,
    clock: Arc<dyn Clock>,
    project_root: String,
}

impl CheckpointStore {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        location: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            location: location.into(),
            clock,
            project_root: String::new(),
        }
    }

    /// Project root recorded in the manifest
    pub fn with_project_root(mut self, project_root: impl Into<String>) -> Self {
        self.project_root = project_root.into();
        self
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.location.join(CHECKPOINTS_DIR)
    }

    fn manifest_key(&self) -> PathBuf {
        self.checkpoints_dir().join(MANIFEST_FILE)
    }

    fn checkpoint_key(&self, id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{id}.json"))
    }

    fn audit_key(&self) -> PathBuf {
        self.location.join(AUDIT_FILE)
    }

    // -------------------------------------------------------------------------
    // Low-level helpers: translate storage failures into CheckpointError
    // -------------------------------------------------------------------------

    fn read_blob(&self, key: &Path) -> Result<Vec<u8>, CheckpointError> {
        self.storage.read(key).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CheckpointError::NotFound {
                    path: key.to_path_buf(),
                }
            } else {
                CheckpointError::Storage {
                    path: key.to_path_buf(),
                    source,
                }
            }
        })
    }

    fn mkdir(&self, key: &Path) -> Result<(), CheckpointError> {
        self.storage
            .mkdir(key)
            .map_err(|source| CheckpointError::Storage {
                path: key.to_path_buf(),
                source,
            })
    }

    fn write_json<T: Serialize>(
        &self,
        key: &Path,
        value: &T,
        what: &'static str,
    ) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| CheckpointError::Encode { what, source })?;
        self.storage
            .write(key, &bytes)
            .map_err(|source| CheckpointError::Storage {
                path: key.to_path_buf(),
                source,
            })
    }

    /// Write a derived JSON artifact to `<location>/<dir>/<file_name>`
    pub(crate) fn write_artifact<T: Serialize>(
        &self,
        dir: &str,
        file_name: &str,
        value: &T,
    ) -> Result<PathBuf, CheckpointError> {
        let dir_key = self.location.join(dir);
        self.mkdir(&dir_key)?;
        let key = dir_key.join(file_name);
        self.write_json(&key, value, "artifact")?;
        Ok(key)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Load the manifest. A missing manifest is an empty history; a
    /// malformed one is an error.
    pub fn read_manifest(&self) -> Result<CheckpointManifest, CheckpointError> {
        let key = self.manifest_key();
        match self.read_blob(&key) {
            Ok(bytes) => decode(&key, &bytes, MANIFEST_SCHEMA_VERSION),
            Err(e) if e.is_not_found() => {
                debug!(
                    "No manifest at {} ({} store)",
                    key.display(),
                    self.storage.name()
                );
                Ok(CheckpointManifest::empty(self.project_root.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Load one checkpoint body and verify it against its fingerprint
    pub fn read(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        if !is_valid_checkpoint_id(id) {
            return Err(CheckpointError::InvalidId { id: id.to_string() });
        }
        let key = self.checkpoint_key(id);
        let bytes = self.read_blob(&key)?;
        let checkpoint: Checkpoint = decode(&key, &bytes, CHECKPOINT_SCHEMA_VERSION)?;

        if checkpoint.id != id {
            return Err(CheckpointError::Invalid {
                path: key,
                reason: format!("file declares id '{}'", checkpoint.id),
            });
        }
        let actual = fingerprint(&checkpoint.findings)?;
        if actual != checkpoint.fingerprint {
            return Err(CheckpointError::Invalid {
                path: key,
                reason: format!(
                    "fingerprint mismatch (stored {}, computed {})",
                    checkpoint.fingerprint, actual
                ),
            });
        }
        Ok(checkpoint)
    }

    /// Newest-first metadata, each entry carrying its delta against the
    /// checkpoint immediately before it
    pub fn list(&self, limit: usize) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        self.list_page(0, limit)
    }

    /// Like [`list`](Self::list), skipping the `offset` newest entries first
    pub fn list_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let manifest = self.read_manifest()?;
        let entries = &manifest.checkpoints;
        Ok(entries
            .iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, meta)| {
                let mut annotated = meta.clone();
                annotated.delta = entries
                    .get(i + 1)
                    .map(|previous| CheckpointDelta::between(&previous.summary, &meta.summary));
                annotated
            })
            .collect())
    }

    fn read_audit(&self) -> Result<AuditRecord, CheckpointError> {
        let key = self.audit_key();
        let bytes = self.read_blob(&key)?;
        decode(&key, &bytes, AUDIT_SCHEMA_VERSION)
    }

    /// Latest-run view. Advisory: an unreadable record is logged and
    /// reported as absent.
    pub fn read_latest_audit(&self) -> Option<AuditRecord> {
        match self.read_audit() {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!("Ignoring unreadable audit record: {}", e);
                None
            }
        }
    }

    /// Revision for the next checkpoint.
    ///
    /// One past the highest revision found in `audit.json` or at the head of
    /// the manifest, counting only files that decode and validate. When
    /// neither is usable the counter restarts at 1 rather than blocking the
    /// run.
    pub fn next_revision(&self) -> u64 {
        let from_audit = match self.read_audit() {
            Ok(record) => Some(record.revision),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!("Ignoring unusable audit record for revision numbering: {}", e);
                None
            }
        };
        let from_manifest = match self.read_manifest() {
            Ok(manifest) => manifest.latest().map(|m| m.revision),
            Err(e) => {
                warn!("Ignoring unreadable manifest for revision numbering: {}", e);
                None
            }
        };
        if let (Some(audit), Some(head)) = (from_audit, from_manifest) {
            if audit < head {
                warn!(
                    "audit.json is behind the manifest (revision {} < {}), continuing from the manifest",
                    audit, head
                );
            }
        }
        from_audit.max(from_manifest).map_or(1, |revision| revision + 1)
    }

    /// Manifest to extend on the write path.
    ///
    /// A manifest that exists but cannot be decoded is moved aside to
    /// `checkpoints/manifest.corrupt-<timestamp>.json` and history restarts
    /// from an empty manifest. Storage failures still abort the write.
    fn manifest_for_write(&self) -> Result<CheckpointManifest, CheckpointError> {
        match self.read_manifest() {
            Ok(manifest) => Ok(manifest),
            Err(
                e @ (CheckpointError::Corrupt { .. }
                | CheckpointError::SchemaMismatch { .. }
                | CheckpointError::Invalid { .. }),
            ) => {
                let key = self.manifest_key();
                let quarantine = self.checkpoints_dir().join(format!(
                    "manifest.corrupt-{}.json",
                    self.clock.now().format("%Y%m%dT%H%M%S%3fZ")
                ));
                let bytes = self.read_blob(&key)?;
                self.storage
                    .write(&quarantine, &bytes)
                    .map_err(|source| CheckpointError::Storage {
                        path: quarantine.clone(),
                        source,
                    })?;
                warn!(
                    "Unusable manifest ({}), kept it as {} and started a new history",
                    e,
                    quarantine.display()
                );
                Ok(CheckpointManifest::empty(self.project_root.clone()))
            }
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    fn write_checkpoint(
        &self,
        findings: FindingsGroup,
        config: Value,
        revision: u64,
        attribution: Option<Attribution>,
    ) -> Result<(Checkpoint, CheckpointMetadata), CheckpointError> {
        let mut manifest = self.manifest_for_write()?;

        let timestamp = self.clock.now();
        let id = checkpoint_id(timestamp, revision);
        let key = self.checkpoint_key(&id);

        self.mkdir(&self.checkpoints_dir())?;
        if self.storage.exists(&key) {
            return Err(CheckpointError::AlreadyExists { id });
        }

        let checkpoint = Checkpoint {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            id,
            revision,
            timestamp,
            fingerprint: fingerprint(&findings)?,
            findings,
            config,
            attribution,
        };
        self.write_json(&key, &checkpoint, "checkpoint")?;

        let delta = manifest
            .latest()
            .map(|previous| CheckpointDelta::between(&previous.summary, &checkpoint.findings.summary()));
        let metadata = checkpoint.metadata(delta);

        manifest.schema_version = MANIFEST_SCHEMA_VERSION;
        if !self.project_root.is_empty() {
            manifest.project_root = self.project_root.clone();
        }
        manifest.checkpoints.insert(0, metadata.clone());
        self.write_json(&self.manifest_key(), &manifest, "manifest")?;

        info!(
            "Created checkpoint {} (revision {}, {} results)",
            metadata.id, metadata.revision, metadata.summary.total
        );
        Ok((checkpoint, metadata))
    }

    /// Persist a new immutable checkpoint and prepend it to the manifest
    pub fn create(
        &self,
        findings: FindingsGroup,
        config: Value,
        revision: u64,
        attribution: Option<Attribution>,
    ) -> Result<CheckpointMetadata, CheckpointError> {
        self.write_checkpoint(findings, config, revision, attribution)
            .map(|(_, metadata)| metadata)
    }

    /// Full write path for one audit run: pick the next revision, create the
    /// checkpoint, then refresh `audit.json`.
    pub fn record(
        &self,
        findings: FindingsGroup,
        config: Value,
        attribution: Option<Attribution>,
    ) -> Result<CheckpointMetadata, CheckpointError> {
        let revision = self.next_revision();
        let (checkpoint, metadata) =
            self.write_checkpoint(findings, config, revision, attribution)?;

        let record = AuditRecord {
            schema_version: AUDIT_SCHEMA_VERSION,
            revision: checkpoint.revision,
            timestamp: checkpoint.timestamp,
            checkpoint_id: checkpoint.id,
            findings: checkpoint.findings,
            config: checkpoint.config,
            attribution: checkpoint.attribution,
        };
        self.mkdir(&self.location)?;
        self.write_json(&self.audit_key(), &record, "audit record")?;

        Ok(metadata)
    }
}

/// Parse a versioned JSON artifact, checking `schemaVersion` before the body
fn decode<T: DeserializeOwned>(path: &Path, bytes: &[u8], expected: u32) -> Result<T, CheckpointError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match value.get("schemaVersion").and_then(Value::as_u64) {
        Some(found) if found == u64::from(expected) => {}
        Some(found) => {
            return Err(CheckpointError::SchemaMismatch {
                path: path.to_path_buf(),
                found,
                expected,
            })
        }
        None => {
            return Err(CheckpointError::Corrupt {
                path: path.to_path_buf(),
                reason: "missing schemaVersion".to_string(),
            })
        }
    }

    serde_json::from_value(value).map_err(|e| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
