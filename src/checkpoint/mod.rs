//! Versioned audit checkpoints
//!
//! Every audit run is persisted as one immutable [`Checkpoint`] under
//! `<location>/checkpoints/<id>.json`. A newest-first
//! [`CheckpointManifest`] lists lightweight metadata (summary plus delta from
//! the previous run) so history can be paged without loading bodies, and
//! `<location>/audit.json` holds the latest-run view.
//!
//! Layout:
//!
//! ```text
//! <location>/
//!   audit.json
//!   checkpoints/
//!     manifest.json
//!     20250301T120000000Z-r1.json
//!     20250302T120000000Z-r2.json
//!   norms/
//!     src__legacy.json
//! ```

mod store;

pub use store::CheckpointStore;

use crate::findings::{FindingsGroup, FindingsSummary};
use crate::models::Attribution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Schema version for checkpoint bodies - bump when the format changes
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Schema version for the manifest
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Schema version for the latest-run view
pub const AUDIT_SCHEMA_VERSION: u32 = 1;

/// Errors raised while reading or writing persisted audit state
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("nothing stored at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("corrupt artifact {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("unsupported schema version {found} in {} (expected {expected})", path.display())]
    SchemaMismatch {
        path: PathBuf,
        found: u64,
        expected: u32,
    },

    #[error("invalid artifact {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("invalid checkpoint id '{id}'")]
    InvalidId { id: String },

    #[error("checkpoint {id} already exists")]
    AlreadyExists { id: String },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CheckpointError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound { .. })
    }
}

/// Signed change in summary counts relative to the previous checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDelta {
    pub errors: i64,
    pub warnings: i64,
    pub info: i64,
    pub total: i64,
}

impl CheckpointDelta {
    /// `current - previous` for every severity bucket and the total
    pub fn between(previous: &FindingsSummary, current: &FindingsSummary) -> Self {
        fn diff(before: usize, after: usize) -> i64 {
            after as i64 - before as i64
        }
        Self {
            errors: diff(previous.errors, current.errors),
            warnings: diff(previous.warnings, current.warnings),
            info: diff(previous.info, current.info),
            total: diff(previous.total, current.total),
        }
    }
}

/// Lightweight manifest entry for one checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub id: String,
    pub revision: u64,
    pub timestamp: DateTime<Utc>,
    pub summary: FindingsSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<CheckpointDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

/// One immutable audit snapshot. Self-contained: readable without the
/// manifest or any other checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub schema_version: u32,
    pub id: String,
    pub revision: u64,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the canonical JSON encoding of `findings`
    pub fingerprint: String,
    pub findings: FindingsGroup,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

impl Checkpoint {
    pub fn metadata(&self, delta: Option<CheckpointDelta>) -> CheckpointMetadata {
        CheckpointMetadata {
            id: self.id.clone(),
            revision: self.revision,
            timestamp: self.timestamp,
            summary: self.findings.summary(),
            delta,
            attribution: self.attribution.clone(),
        }
    }
}

/// Newest-first list of checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub project_root: String,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointMetadata>,
}

impl CheckpointManifest {
    pub fn empty(project_root: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            project_root: project_root.into(),
            checkpoints: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Most recent checkpoint, if any
    pub fn latest(&self) -> Option<&CheckpointMetadata> {
        self.checkpoints.first()
    }
}

/// Latest-run view written next to the checkpoint directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub schema_version: u32,
    pub revision: u64,
    pub timestamp: DateTime<Utc>,
    pub checkpoint_id: String,
    pub findings: FindingsGroup,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

/// Hex SHA-256 over the canonical JSON of a findings group
pub fn fingerprint(findings: &FindingsGroup) -> Result<String, CheckpointError> {
    let bytes = serde_json::to_vec(findings).map_err(|source| CheckpointError::Encode {
        what: "findings",
        source,
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Checkpoint ids sort chronologically: `<yyyymmddThhmmssmmm>Z-r<revision>`
pub fn checkpoint_id(timestamp: DateTime<Utc>, revision: u64) -> String {
    format!("{}-r{}", timestamp.format("%Y%m%dT%H%M%S%3fZ"), revision)
}

/// Ids become file names, so only a conservative character set is allowed
pub fn is_valid_checkpoint_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id != "manifest"
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
