//! Directory summaries
//!
//! Loads checkpoint history from a [`CheckpointStore`], runs the pure
//! detector over it and assembles a [`DirectorySummary`]. Summaries are only
//! written to disk when explicitly asked for.

use super::detector::{
    compute_directory_stats, detect_norms, determine_status, find_clean_timestamp,
    normalize_directory, DetectedNorm, DetectionError, DEFAULT_LOOKBACK_WINDOW,
};
use super::{DirectorySummary, Norm};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointMetadata, CheckpointStore};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// How many checkpoints feed a summary by default
pub const DEFAULT_CHECKPOINT_LIMIT: usize = 50;

/// Concurrent checkpoint body reads
pub const DEFAULT_READ_CONCURRENCY: usize = 4;

const NORMS_DIR: &str = "norms";

/// Errors that can occur while summarizing a directory
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("no checkpoints recorded yet, cannot summarize '{directory}'")]
    NoCheckpoints { directory: String },

    #[error("failed to load checkpoint history for '{directory}': {source}")]
    History {
        directory: String,
        #[source]
        source: CheckpointError,
    },

    #[error("norm detection failed for '{directory}': {source}")]
    Detection {
        directory: String,
        #[source]
        source: DetectionError,
    },

    #[error("failed to persist summary for '{directory}': {source}")]
    Persist {
        directory: String,
        #[source]
        source: CheckpointError,
    },

    #[error("failed to start checkpoint readers: {0}")]
    ReaderPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Trailing zero checkpoints required for a norm
    pub lookback_window: usize,
    /// Only the most recent N checkpoints are replayed
    pub checkpoint_limit: usize,
    /// Checkpoint bodies read in parallel
    pub read_concurrency: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
            checkpoint_limit: DEFAULT_CHECKPOINT_LIMIT,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
        }
    }
}

/// Builds directory summaries from one store's history
pub struct DirectorySummarizer<'a> {
    store: &'a CheckpointStore,
    options: SummaryOptions,
}

impl<'a> DirectorySummarizer<'a> {
    pub fn new(store: &'a CheckpointStore, options: SummaryOptions) -> Self {
        Self { store, options }
    }

    /// Oldest-first metadata for the most recent `checkpoint_limit` runs
    fn select_history(&self, directory: &str) -> Result<Vec<CheckpointMetadata>, SummaryError> {
        let manifest = self
            .store
            .read_manifest()
            .map_err(|source| SummaryError::History {
                directory: directory.to_string(),
                source,
            })?;
        if manifest.is_empty() {
            return Err(SummaryError::NoCheckpoints {
                directory: directory.to_string(),
            });
        }

        // Manifest is newest-first; reverse before the stable sort so equal
        // timestamps keep their recorded order
        let mut entries = manifest.checkpoints;
        entries.reverse();
        entries.sort_by_key(|m| m.timestamp);

        let limit = self.options.checkpoint_limit.max(1);
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        Ok(entries)
    }

    /// Read checkpoint bodies on a small dedicated pool, preserving order
    fn load_bodies(
        &self,
        directory: &str,
        entries: &[CheckpointMetadata],
    ) -> Result<Vec<Checkpoint>, SummaryError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.read_concurrency.max(1))
            .build()?;

        let store = self.store;
        let loaded: Result<Vec<Checkpoint>, CheckpointError> = pool.install(|| {
            entries
                .par_iter()
                .map(|meta| store.read(&meta.id))
                .collect()
        });

        loaded.map_err(|source| SummaryError::History {
            directory: directory.to_string(),
            source,
        })
    }

    /// Summarize one directory from the stored history
    pub fn summarize(&self, directory: &str) -> Result<DirectorySummary, SummaryError> {
        let directory = normalize_directory(directory);
        let entries = self.select_history(&directory)?;
        let checkpoints = self.load_bodies(&directory, &entries)?;
        debug!(
            "Loaded {} checkpoints for directory '{}'",
            checkpoints.len(),
            directory
        );

        let detection_error = |source: DetectionError| SummaryError::Detection {
            directory: directory.clone(),
            source,
        };

        let detected = detect_norms(&checkpoints, &directory, self.options.lookback_window)
            .map_err(detection_error)?;
        let norms = detected
            .into_iter()
            .map(into_norm)
            .collect::<Result<Vec<Norm>, _>>()
            .map_err(detection_error)?;

        let files = compute_directory_stats(&checkpoints, &directory);
        let status = determine_status(&files, norms.len());
        let clean_since = find_clean_timestamp(&checkpoints, &directory)
            .map(from_millis)
            .transpose()
            .map_err(detection_error)?;

        let latest_checkpoint = match entries.last() {
            Some(meta) => meta.clone(),
            None => {
                return Err(SummaryError::NoCheckpoints {
                    directory: directory.clone(),
                })
            }
        };

        info!(
            "Directory '{}' is {} ({} norms, {}/{} files clean)",
            directory,
            status,
            norms.len(),
            files.clean,
            files.total
        );

        Ok(DirectorySummary {
            directory,
            status,
            clean_since,
            files,
            norms,
            latest_checkpoint,
        })
    }

    /// Persist a summary as `norms/<escaped-directory>.json`
    pub fn write_summary(&self, summary: &DirectorySummary) -> Result<PathBuf, SummaryError> {
        let file_name = summary_file_name(&summary.directory);
        let path = self
            .store
            .write_artifact(NORMS_DIR, &file_name, summary)
            .map_err(|source| SummaryError::Persist {
                directory: summary.directory.clone(),
                source,
            })?;
        info!("Wrote directory summary to {}", path.display());
        Ok(path)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DetectionError> {
    DateTime::from_timestamp_millis(ms).ok_or(DetectionError::TimestampOutOfRange(ms))
}

fn into_norm(detected: DetectedNorm) -> Result<Norm, DetectionError> {
    Ok(Norm {
        established_at: from_millis(detected.established_at_ms)?,
        rule_id: detected.rule_id,
        rule_kind: detected.rule_kind,
        severity: detected.severity,
        violations_fixed: detected.violations_fixed,
        docs_url: detected.docs_url,
    })
}

/// File name for a directory summary: separators become `__`, the project
/// root is `_root`
pub fn summary_file_name(directory: &str) -> String {
    let directory = normalize_directory(directory);
    if directory.is_empty() {
        "_root.json".to_string()
    } else {
        format!("{}.json", directory.replace('/', "__"))
    }
}

/// One-shot helper around [`DirectorySummarizer`]
pub fn summarize_directory(
    store: &CheckpointStore,
    directory: &str,
    lookback_window: usize,
    checkpoint_limit: usize,
) -> Result<DirectorySummary, SummaryError> {
    let options = SummaryOptions {
        lookback_window,
        checkpoint_limit,
        ..SummaryOptions::default()
    };
    DirectorySummarizer::new(store, options).summarize(directory)
}
