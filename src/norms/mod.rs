//! Directory norms
//!
//! A norm is a rule whose violations inside a directory dropped to zero and
//! stayed there for a sustained window of checkpoints. Norms are always
//! derived from checkpoint history and never stored as facts of their own;
//! running detection over the same history gives the same norms.

pub mod detector;
mod summary;

pub use detector::{
    compute_directory_stats, detect_norms, determine_status, find_clean_timestamp,
    DetectedNorm, DetectionError, DEFAULT_LOOKBACK_WINDOW,
};
pub use summary::{
    summarize_directory, summary_file_name, DirectorySummarizer, SummaryError, SummaryOptions,
    DEFAULT_CHECKPOINT_LIMIT, DEFAULT_READ_CONCURRENCY,
};

use crate::checkpoint::CheckpointMetadata;
use crate::models::{RuleKind, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A rule that has become an established convention in a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Norm {
    pub rule_id: String,
    pub rule_kind: RuleKind,
    pub severity: Severity,
    pub established_at: DateTime<Utc>,
    pub violations_fixed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
}

/// Migration status of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryStatus {
    Migrated,
    InProgress,
    NotStarted,
}

impl fmt::Display for DirectoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryStatus::Migrated => write!(f, "migrated"),
            DirectoryStatus::InProgress => write!(f, "in-progress"),
            DirectoryStatus::NotStarted => write!(f, "not-started"),
        }
    }
}

/// File cleanliness counts for a directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    /// Every file seen under the directory in any checkpoint
    pub total: usize,
    /// Files from `total` with no violations in the latest checkpoint
    pub clean: usize,
    /// Files with violations in the latest checkpoint
    pub with_violations: usize,
}

/// Point-in-time report for one directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySummary {
    pub directory: String,
    pub status: DirectoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_since: Option<DateTime<Utc>>,
    pub files: DirectoryStats,
    pub norms: Vec<Norm>,
    pub latest_checkpoint: CheckpointMetadata,
}
