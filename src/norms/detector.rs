//! Norm detection over checkpoint history
//!
//! Pure functions: no I/O, no clock, no shared state. Input is a slice of
//! checkpoints in ascending time order; output uses plain epoch milliseconds
//! and is turned into the typed model by the summarizer.
//!
//! For each rule, a series of per-checkpoint violation counts scoped to the
//! directory is built and scanned from the end:
//!
//! ```text
//! counts:  42  15   0   0   0   0   0      (K = 5)
//!               ^   \________________/
//!               |    trailing window, all zero
//!               last nonzero -> violations_fixed = 15
//!                   ^ established_at
//! ```

use super::{DirectoryStats, DirectoryStatus};
use crate::checkpoint::Checkpoint;
use crate::findings::{FindingsGroup, RuleDef};
use crate::models::{normalize_path, RuleKind, Severity};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Consecutive zero checkpoints needed before a rule counts as a norm
pub const DEFAULT_LOOKBACK_WINDOW: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("lookback window must be at least 1")]
    ZeroLookback,

    #[error("checkpoint {id} ({timestamp_ms}ms) is older than the checkpoint before it")]
    OutOfOrder { id: String, timestamp_ms: i64 },

    #[error("timestamp {0}ms is outside the representable range")]
    TimestampOutOfRange(i64),
}

/// One point in a rule's time series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPoint {
    pub timestamp_ms: i64,
    pub count: usize,
}

/// Detector output for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedNorm {
    pub rule_id: String,
    pub rule_kind: RuleKind,
    pub severity: Severity,
    pub docs_url: Option<String>,
    pub established_at_ms: i64,
    pub violations_fixed: usize,
}

/// Canonical form of a directory argument: `""` stands for the project root
pub fn normalize_directory(directory: &str) -> String {
    let path = normalize_path(directory);
    let trimmed = path.trim_end_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Whether `path` lies under `directory` (already normalized)
pub fn is_under_directory(path: &str, directory: &str) -> bool {
    if directory.is_empty() {
        return true;
    }
    path.strip_prefix(directory)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

/// Per-file flag: is `files[i]` inside the directory
fn files_in_scope(group: &FindingsGroup, directory: &str) -> Vec<bool> {
    group
        .files()
        .iter()
        .map(|p| is_under_directory(p, directory))
        .collect()
}

/// Violation count per rule id for results under the directory
fn rule_counts<'a>(group: &'a FindingsGroup, directory: &str) -> HashMap<&'a str, usize> {
    let in_scope = files_in_scope(group, directory);
    let mut counts = HashMap::new();
    for result in group.results() {
        let scoped = result.file.map(|f| in_scope[f]).unwrap_or(false);
        if scoped {
            *counts
                .entry(group.rules()[result.rule].id.as_str())
                .or_insert(0) += 1;
        }
    }
    counts
}

/// Total violations under the directory, per checkpoint
fn directory_series(checkpoints: &[Checkpoint], directory: &str) -> Vec<SeriesPoint> {
    checkpoints
        .iter()
        .map(|c| SeriesPoint {
            timestamp_ms: c.timestamp.timestamp_millis(),
            count: rule_counts(&c.findings, directory).values().sum(),
        })
        .collect()
}

/// One series per rule id seen in any checkpoint's rule table.
///
/// `directory` must already be normalized. A rule absent from a checkpoint
/// contributes a zero point there, so every series has one point per
/// checkpoint.
fn series_by_rule<'a>(
    checkpoints: &'a [Checkpoint],
    directory: &str,
) -> BTreeMap<&'a str, Vec<SeriesPoint>> {
    let mut series: BTreeMap<&str, Vec<SeriesPoint>> = checkpoints
        .iter()
        .flat_map(|c| c.findings.rules())
        .map(|rule| (rule.id.as_str(), Vec::with_capacity(checkpoints.len())))
        .collect();

    for checkpoint in checkpoints {
        let timestamp_ms = checkpoint.timestamp.timestamp_millis();
        let counts = rule_counts(&checkpoint.findings, directory);
        for (id, points) in series.iter_mut() {
            points.push(SeriesPoint {
                timestamp_ms,
                count: counts.get(id).copied().unwrap_or(0),
            });
        }
    }
    series
}

/// Time series of one rule's violations under the directory
pub fn rule_series(checkpoints: &[Checkpoint], directory: &str, rule_id: &str) -> Vec<SeriesPoint> {
    let directory = normalize_directory(directory);
    series_by_rule(checkpoints, &directory)
        .remove(rule_id)
        .unwrap_or_else(|| {
            checkpoints
                .iter()
                .map(|c| SeriesPoint {
                    timestamp_ms: c.timestamp.timestamp_millis(),
                    count: 0,
                })
                .collect()
        })
}

/// Decide whether a series has settled at zero.
///
/// Returns `(established_at_ms, violations_fixed)` when the series has at
/// least `lookback + 1` points, the trailing `lookback` are zero and
/// something before them was not.
pub fn evaluate_series(series: &[SeriesPoint], lookback: usize) -> Option<(i64, usize)> {
    if lookback == 0 || series.len() < lookback + 1 {
        return None;
    }
    let window_start = series.len() - lookback;
    if series[window_start..].iter().any(|p| p.count != 0) {
        return None;
    }
    let last_nonzero = series[..window_start].iter().rposition(|p| p.count != 0)?;
    let transition = series[last_nonzero + 1];
    Some((transition.timestamp_ms, series[last_nonzero].count))
}

fn check_order(checkpoints: &[Checkpoint]) -> Result<(), DetectionError> {
    for pair in checkpoints.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(DetectionError::OutOfOrder {
                id: pair[1].id.clone(),
                timestamp_ms: pair[1].timestamp.timestamp_millis(),
            });
        }
    }
    Ok(())
}

/// Find every rule that has become a norm in `directory`.
///
/// Rules are taken from the rule tables of all supplied checkpoints; a rule
/// missing from a checkpoint counts as zero there. Output is sorted by rule
/// id.
pub fn detect_norms(
    checkpoints: &[Checkpoint],
    directory: &str,
    lookback: usize,
) -> Result<Vec<DetectedNorm>, DetectionError> {
    if lookback == 0 {
        return Err(DetectionError::ZeroLookback);
    }
    check_order(checkpoints)?;
    let directory = normalize_directory(directory);

    // Newest definition of every rule ever seen
    let mut rules: BTreeMap<&str, &RuleDef> = BTreeMap::new();
    for checkpoint in checkpoints {
        for rule in checkpoint.findings.rules() {
            rules.insert(rule.id.as_str(), rule);
        }
    }

    let mut norms = Vec::new();
    for (id, series) in series_by_rule(checkpoints, &directory) {
        let Some(rule) = rules.get(id) else {
            continue;
        };
        if let Some((established_at_ms, violations_fixed)) = evaluate_series(&series, lookback) {
            norms.push(DetectedNorm {
                rule_id: id.to_string(),
                rule_kind: rule.kind,
                severity: rule.severity,
                docs_url: rule.docs_url.clone(),
                established_at_ms,
                violations_fixed,
            });
        }
    }
    Ok(norms)
}

/// File counts for a directory.
///
/// `total` is the union over all checkpoints (deleted files still count);
/// `with_violations` and `clean` describe the latest checkpoint only.
pub fn compute_directory_stats(checkpoints: &[Checkpoint], directory: &str) -> DirectoryStats {
    let directory = normalize_directory(directory);

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for checkpoint in checkpoints {
        seen.extend(
            checkpoint
                .findings
                .files()
                .iter()
                .map(String::as_str)
                .filter(|p| is_under_directory(p, &directory)),
        );
    }

    let with_violations = checkpoints
        .last()
        .map(|latest| {
            let group = &latest.findings;
            group
                .groups()
                .by_file
                .keys()
                .filter(|&&f| is_under_directory(&group.files()[f], &directory))
                .count()
        })
        .unwrap_or(0);

    DirectoryStats {
        total: seen.len(),
        clean: seen.len().saturating_sub(with_violations),
        with_violations,
    }
}

/// Classify a directory from its stats and norm count
pub fn determine_status(stats: &DirectoryStats, norm_count: usize) -> DirectoryStatus {
    if stats.with_violations == 0 && norm_count > 0 {
        DirectoryStatus::Migrated
    } else if stats.total == 0 && norm_count == 0 {
        DirectoryStatus::NotStarted
    } else {
        DirectoryStatus::InProgress
    }
}

/// Earliest checkpoint from which the directory has stayed at zero.
///
/// `None` if the latest checkpoint still has violations (even after an
/// earlier clean stretch) or there is no history.
pub fn find_clean_timestamp(checkpoints: &[Checkpoint], directory: &str) -> Option<i64> {
    let directory = normalize_directory(directory);
    let series = directory_series(checkpoints, &directory);
    match series.iter().rposition(|p| p.count != 0) {
        None => series.first().map(|p| p.timestamp_ms),
        Some(last) => series.get(last + 1).map(|p| p.timestamp_ms),
    }
}
