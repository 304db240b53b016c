//! End-to-end history tests against the filesystem store
//!
//! Drives normalize -> record -> summarize through the public API with a
//! manual clock, so norm timestamps are exact.

use chrono::{DateTime, Duration, TimeZone, Utc};
use normscope::checkpoint::{CheckpointError, CheckpointStore};
use normscope::clock::ManualClock;
use normscope::findings::{derive_result_key, diff_findings, normalize};
use normscope::models::{RuleKind, Severity, SourceRange, Violation};
use normscope::norms::{
    summarize_directory, DirectoryStatus, DirectorySummarizer, SummaryError, SummaryOptions,
};
use normscope::storage::FsBlobStore;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

struct Project {
    dir: TempDir,
    clock: Arc<ManualClock>,
    store: CheckpointStore,
}

fn project() -> Project {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let store = CheckpointStore::new(
        Arc::new(FsBlobStore::new(dir.path())),
        ".normscope",
        clock.clone(),
    )
    .with_project_root(dir.path().display().to_string());
    Project { dir, clock, store }
}

fn moment_violations(count: usize) -> Vec<Violation> {
    (0..count)
        .map(|i| Violation {
            id: "no-moment".into(),
            kind: RuleKind::Import,
            severity: Severity::Error,
            message: "moment is deprecated, use date-fns".into(),
            file: Some(format!("src/legacy/file{}.ts", i % 6)),
            range: Some(SourceRange::new(i as u32 + 1, 0, i as u32 + 1, 24)),
            docs_url: Some("https://docs.example/dates".into()),
            tags: None,
        })
        .collect()
}

impl Project {
    fn record_counts(&self, counts: &[usize]) {
        for &count in counts {
            self.store
                .record(normalize(&moment_violations(count)), Value::Null, None)
                .unwrap();
            self.clock.advance(Duration::hours(6));
        }
    }

    fn at(&self, step: i64) -> DateTime<Utc> {
        start() + Duration::hours(6 * step)
    }
}

#[test]
fn test_migration_becomes_norm() {
    let p = project();
    p.record_counts(&[42, 15, 0, 0, 0, 0, 0]);

    let summary = summarize_directory(&p.store, "src/legacy", 5, 50).unwrap();
    assert_eq!(summary.status, DirectoryStatus::Migrated);
    assert_eq!(summary.norms.len(), 1);

    let norm = &summary.norms[0];
    assert_eq!(norm.rule_id, "no-moment");
    assert_eq!(norm.rule_kind, RuleKind::Import);
    assert_eq!(norm.severity, Severity::Error);
    assert_eq!(norm.established_at, p.at(2));
    assert_eq!(norm.violations_fixed, 15);

    assert_eq!(summary.files.total, 6);
    assert_eq!(summary.files.clean, 6);
    assert_eq!(summary.clean_since, Some(p.at(2)));
    assert_eq!(summary.latest_checkpoint.revision, 7);
}

#[test]
fn test_no_norm_while_violations_remain() {
    let p = project();
    p.record_counts(&[42, 15, 10]);
    let summary = summarize_directory(&p.store, "src/legacy", 5, 50).unwrap();
    assert!(summary.norms.is_empty());
    assert_eq!(summary.status, DirectoryStatus::InProgress);
}

#[test]
fn test_regression_clears_norm() {
    let p = project();
    p.record_counts(&[5, 0, 0]);
    assert_eq!(
        summarize_directory(&p.store, "src/legacy", 2, 50)
            .unwrap()
            .norms
            .len(),
        1
    );

    p.record_counts(&[1]);
    let summary = summarize_directory(&p.store, "src/legacy", 2, 50).unwrap();
    assert!(summary.norms.is_empty());
    assert_eq!(summary.status, DirectoryStatus::InProgress);
}

#[test]
fn test_history_survives_reopen() {
    let p = project();
    p.record_counts(&[10, 4]);

    let reopened = CheckpointStore::new(
        Arc::new(FsBlobStore::new(p.dir.path())),
        ".normscope",
        Arc::new(ManualClock::new(p.at(10))),
    );
    let listed = reopened.list(10).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].revision, 2);
    assert_eq!(listed[0].delta.unwrap().errors, -6);
    assert_eq!(reopened.next_revision(), 3);

    let manifest = reopened.read_manifest().unwrap();
    assert_eq!(manifest.project_root, p.dir.path().display().to_string());
    assert!(p
        .dir
        .path()
        .join(".normscope/checkpoints/manifest.json")
        .is_file());
    assert!(p.dir.path().join(".normscope/audit.json").is_file());
}

#[test]
fn test_diff_between_checkpoints() {
    let p = project();
    p.record_counts(&[3, 1]);
    let listed = p.store.list(2).unwrap();
    let newer = p.store.read(&listed[0].id).unwrap();
    let older = p.store.read(&listed[1].id).unwrap();

    let diff = diff_findings(&older.findings, &newer.findings);
    assert_eq!(diff.added.len(), 0);
    assert_eq!(diff.removed.len(), 2);
    assert_eq!(diff.unchanged, 1);
}

#[test]
fn test_result_keys_stable_across_snapshots() {
    let small = normalize(&moment_violations(1));
    let mut mixed = moment_violations(1);
    mixed.push(Violation {
        id: "aaa-first-rule".into(),
        severity: Severity::Warning,
        message: "shifts every index".into(),
        file: Some("src/aaa.ts".into()),
        ..Default::default()
    });
    let large = normalize(&mixed);

    let key_of = |group: &normscope::findings::FindingsGroup, rule: &str| {
        let index = group.index();
        let result = index.results_for_rule(rule).next().unwrap();
        derive_result_key(result, group.rules(), group.files()).unwrap()
    };
    assert_eq!(key_of(&small, "no-moment"), key_of(&large, "no-moment"));
}

#[test]
fn test_written_summary_lands_under_norms() {
    let p = project();
    p.record_counts(&[2, 0, 0]);
    let summarizer = DirectorySummarizer::new(
        &p.store,
        SummaryOptions {
            lookback_window: 2,
            read_concurrency: 2,
            ..SummaryOptions::default()
        },
    );
    let summary = summarizer.summarize("src/legacy").unwrap();
    summarizer.write_summary(&summary).unwrap();

    let path = p.dir.path().join(".normscope/norms/src__legacy.json");
    let stored: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(stored["status"], "migrated");
    assert_eq!(stored["norms"][0]["ruleId"], "no-moment");
    assert_eq!(stored["norms"][0]["violationsFixed"], 2);
}

#[test]
fn test_corrupt_checkpoint_fails_summary() {
    let p = project();
    p.record_counts(&[2, 0]);
    let latest = p.store.list(1).unwrap().remove(0);
    let path = p
        .dir
        .path()
        .join(format!(".normscope/checkpoints/{}.json", latest.id));
    std::fs::write(path, "{ truncated").unwrap();

    let err = summarize_directory(&p.store, "src/legacy", 1, 50).unwrap_err();
    assert!(matches!(
        err,
        SummaryError::History {
            source: CheckpointError::Corrupt { .. },
            ..
        }
    ));
}

#[test]
fn test_empty_location_has_no_summary() {
    let p = project();
    assert!(matches!(
        summarize_directory(&p.store, "src", 5, 50).unwrap_err(),
        SummaryError::NoCheckpoints { .. }
    ));
}

#[test]
fn test_corrupt_manifest_recovers_on_next_record() {
    let p = project();
    p.record_counts(&[4]);
    let checkpoints = p.dir.path().join(".normscope/checkpoints");
    std::fs::write(checkpoints.join("manifest.json"), "{ trunc").unwrap();

    // reads still report the damage
    assert!(matches!(
        p.store.read_manifest().unwrap_err(),
        CheckpointError::Corrupt { .. }
    ));

    p.record_counts(&[2, 0]);
    let listed = p.store.list(10).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].revision, 3);
    assert!(listed[1].delta.is_none());

    let kept: Vec<String> = std::fs::read_dir(&checkpoints)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("manifest.corrupt-"))
        .collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(
        std::fs::read_to_string(checkpoints.join(&kept[0])).unwrap(),
        "{ trunc"
    );
}
