//! Findings normalization
//!
//! Turns a flat list of [`Violation`]s into a [`FindingsGroup`]: a rule table
//! and a file table (both sorted, both deduplicated) plus compact result
//! tuples that point into them by index.
//!
//! Indices are only meaningful inside the group that produced them. Anything
//! that compares two groups must go through [`derive_result_key`], which is
//! built from content (rule id, path, range, message) rather than position.
//!
//! # Example
//!
//! ```ignore
//! let group = normalize(&violations);
//! let index = group.index();
//! for result in index.results_for_rule("no-legacy-http") {
//!     println!("{:?}", group.expand(result));
//! }
//! ```

mod diff;

pub use diff::{diff_findings, FindingsDiff};

use crate::models::{normalize_path, RuleKind, Severity, SourceRange, Violation};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// One entry per distinct rule id within a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDef {
    pub id: String,
    pub kind: RuleKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Per-result message: either the rule's own message or a replacement.
///
/// Only collapses to a missing/present JSON field when serialized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MessageOverride {
    #[default]
    Inherit,
    Override(String),
}

impl MessageOverride {
    /// Pick `Inherit` when the reported message matches the rule default
    pub fn for_message(message: &str, rule_message: &str) -> Self {
        if message == rule_message {
            MessageOverride::Inherit
        } else {
            MessageOverride::Override(message.to_string())
        }
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self, MessageOverride::Inherit)
    }

    /// Effective message given the parent rule's default
    pub fn resolve<'a>(&'a self, rule_message: &'a str) -> &'a str {
        match self {
            MessageOverride::Inherit => rule_message,
            MessageOverride::Override(text) => text,
        }
    }
}

impl Serialize for MessageOverride {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessageOverride::Inherit => serializer.serialize_none(),
            MessageOverride::Override(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for MessageOverride {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(text) => MessageOverride::Override(text),
            None => MessageOverride::Inherit,
        })
    }
}

/// A violation compacted to indices into the owning group's tables
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompactResult {
    pub rule: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
    #[serde(default, skip_serializing_if = "MessageOverride::is_inherit")]
    pub message: MessageOverride,
}

/// Counts by severity for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingsSummary {
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
    /// Distinct files with at least one result
    pub files: usize,
    pub total: usize,
}

impl FindingsSummary {
    fn from_results(rules: &[RuleDef], results: &[CompactResult]) -> Self {
        let mut summary = Self::default();
        let mut files = BTreeSet::new();
        for result in results {
            match rules[result.rule].severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.info += 1,
            }
            if let Some(file) = result.file {
                files.insert(file);
            }
            summary.total += 1;
        }
        summary.files = files.len();
        summary
    }
}

/// Result indices grouped by file index and by rule index.
///
/// Always a pure function of the results; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindingGroups {
    pub by_file: BTreeMap<usize, Vec<usize>>,
    pub by_rule: BTreeMap<usize, Vec<usize>>,
}

impl FindingGroups {
    pub fn build(results: &[CompactResult]) -> Self {
        let mut groups = Self::default();
        for (i, result) in results.iter().enumerate() {
            groups.by_rule.entry(result.rule).or_default().push(i);
            if let Some(file) = result.file {
                groups.by_file.entry(file).or_default().push(i);
            }
        }
        groups
    }
}

/// Structural problems in a group read back from storage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FindingsError {
    #[error("result {result} references rule index {index} but only {len} rules exist")]
    RuleIndexOutOfRange { result: usize, index: usize, len: usize },

    #[error("result {result} references file index {index} but only {len} files exist")]
    FileIndexOutOfRange { result: usize, index: usize, len: usize },

    #[error("rule table is not sorted by id (at '{id}')")]
    UnsortedRules { id: String },

    #[error("file table is not sorted by path (at '{path}')")]
    UnsortedFiles { path: String },
}

/// The deduplicated, compacted representation of one audit run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawFindingsGroup")]
pub struct FindingsGroup {
    rules: Vec<RuleDef>,
    files: Vec<String>,
    results: Vec<CompactResult>,
    #[serde(skip)]
    groups: FindingGroups,
    summary: FindingsSummary,
}

/// Wire shape; `groups` and `summary` are recomputed on load
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFindingsGroup {
    #[serde(default)]
    rules: Vec<RuleDef>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    results: Vec<CompactResult>,
}

impl TryFrom<RawFindingsGroup> for FindingsGroup {
    type Error = FindingsError;

    fn try_from(raw: RawFindingsGroup) -> Result<Self, Self::Error> {
        FindingsGroup::from_parts(raw.rules, raw.files, raw.results)
    }
}

impl FindingsGroup {
    /// Assemble a group from already-built tables, validating every index.
    ///
    /// Tables must be strictly sorted (which also means unique). Results are
    /// put into canonical order.
    pub fn from_parts(
        rules: Vec<RuleDef>,
        files: Vec<String>,
        mut results: Vec<CompactResult>,
    ) -> Result<Self, FindingsError> {
        if let Some(pair) = rules.windows(2).find(|w| w[0].id >= w[1].id) {
            return Err(FindingsError::UnsortedRules {
                id: pair[1].id.clone(),
            });
        }
        if let Some(pair) = files.windows(2).find(|w| w[0] >= w[1]) {
            return Err(FindingsError::UnsortedFiles {
                path: pair[1].clone(),
            });
        }
        for (i, result) in results.iter().enumerate() {
            if result.rule >= rules.len() {
                return Err(FindingsError::RuleIndexOutOfRange {
                    result: i,
                    index: result.rule,
                    len: rules.len(),
                });
            }
            if let Some(file) = result.file {
                if file >= files.len() {
                    return Err(FindingsError::FileIndexOutOfRange {
                        result: i,
                        index: file,
                        len: files.len(),
                    });
                }
            }
        }

        results.sort();
        let groups = FindingGroups::build(&results);
        let summary = FindingsSummary::from_results(&rules, &results);
        Ok(Self {
            rules,
            files,
            results,
            groups,
            summary,
        })
    }

    pub fn rules(&self) -> &[RuleDef] {
        &self.rules
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn results(&self) -> &[CompactResult] {
        &self.results
    }

    pub fn groups(&self) -> &FindingGroups {
        &self.groups
    }

    pub fn summary(&self) -> FindingsSummary {
        self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Resolve a result of this group back into a full violation
    pub fn expand(&self, result: &CompactResult) -> Option<Violation> {
        expand(result, &self.rules, &self.files)
    }

    pub fn expand_all(&self) -> Vec<Violation> {
        self.results.iter().filter_map(|r| self.expand(r)).collect()
    }

    /// Stable keys for every result, in result order
    pub fn keys(&self) -> impl Iterator<Item = (String, &CompactResult)> + '_ {
        self.results
            .iter()
            .filter_map(|r| derive_result_key(r, &self.rules, &self.files).map(|k| (k, r)))
    }

    /// Build a lookup handle over this group
    pub fn index(&self) -> FindingsIndex<'_> {
        FindingsIndex::new(self)
    }
}

/// O(1) lookups from rule id / file path to table positions.
///
/// Built explicitly by [`FindingsGroup::index`] and passed around by the
/// caller; nothing is cached behind the group's back.
#[derive(Debug)]
pub struct FindingsIndex<'a> {
    group: &'a FindingsGroup,
    rule_ids: HashMap<&'a str, usize>,
    paths: HashMap<&'a str, usize>,
}

impl<'a> FindingsIndex<'a> {
    fn new(group: &'a FindingsGroup) -> Self {
        let rule_ids = group
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();
        let paths = group
            .files
            .iter()
            .enumerate()
            .map(|(i, p)| (p.as_str(), i))
            .collect();
        Self {
            group,
            rule_ids,
            paths,
        }
    }

    pub fn rule_index(&self, id: &str) -> Option<usize> {
        self.rule_ids.get(id).copied()
    }

    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.paths.get(normalize_path(path).as_str()).copied()
    }

    pub fn rule(&self, id: &str) -> Option<&'a RuleDef> {
        self.rule_index(id).map(|i| &self.group.rules[i])
    }

    /// Results reported against a rule id
    pub fn results_for_rule(&self, id: &str) -> impl Iterator<Item = &'a CompactResult> + '_ {
        let group = self.group;
        self.rule_index(id)
            .and_then(|i| group.groups.by_rule.get(&i))
            .into_iter()
            .flatten()
            .map(move |&i| &group.results[i])
    }

    /// Results reported against a file path
    pub fn results_for_file(&self, path: &str) -> impl Iterator<Item = &'a CompactResult> + '_ {
        let group = self.group;
        self.file_index(path)
            .and_then(|i| group.groups.by_file.get(&i))
            .into_iter()
            .flatten()
            .map(move |&i| &group.results[i])
    }
}

/// Collects what we know about one rule while scanning violations
struct RuleAccumulator {
    id: String,
    kind: RuleKind,
    severity: Severity,
    messages: BTreeMap<String, usize>,
    docs_url: Option<String>,
    tags: Option<BTreeSet<String>>,
}

impl RuleAccumulator {
    fn new(violation: &Violation) -> Self {
        Self {
            id: violation.id.clone(),
            kind: violation.kind,
            severity: violation.severity,
            messages: BTreeMap::new(),
            docs_url: None,
            tags: None,
        }
    }

    fn observe(&mut self, violation: &Violation) {
        self.kind = self.kind.min(violation.kind);
        self.severity = self.severity.max(violation.severity);
        *self.messages.entry(violation.message.clone()).or_insert(0) += 1;
        if let Some(url) = &violation.docs_url {
            match &self.docs_url {
                Some(current) if current <= url => {}
                _ => self.docs_url = Some(url.clone()),
            }
        }
        if let Some(tags) = &violation.tags {
            self.tags
                .get_or_insert_with(BTreeSet::new)
                .extend(tags.iter().cloned());
        }
    }

    /// Most frequent message wins; ties go to the smallest string
    fn finish(self) -> RuleDef {
        let message = self
            .messages
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(m, _)| m.clone())
            .unwrap_or_default();
        RuleDef {
            id: self.id,
            kind: self.kind,
            severity: self.severity,
            message,
            docs_url: self.docs_url,
            tags: self.tags.map(|t| t.into_iter().collect()),
        }
    }
}

/// Sort `items`, returning the sorted vector and an old-index → new-index map
fn sort_with_remap<T>(items: Vec<T>, cmp: impl Fn(&T, &T) -> Ordering) -> (Vec<T>, Vec<usize>) {
    let mut indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| cmp(&a.1, &b.1));

    let mut remap = vec![0; indexed.len()];
    let mut sorted = Vec::with_capacity(indexed.len());
    for (new_index, (old_index, item)) in indexed.into_iter().enumerate() {
        remap[old_index] = new_index;
        sorted.push(item);
    }
    (sorted, remap)
}

/// Compact a violation list into a [`FindingsGroup`].
///
/// The output depends only on the multiset of violations, never on their
/// order: rules are sorted by id, files by path, results canonically.
pub fn normalize(violations: &[Violation]) -> FindingsGroup {
    let mut rule_slots: HashMap<&str, usize> = HashMap::new();
    let mut accumulators: Vec<RuleAccumulator> = Vec::new();
    let mut file_slots: HashMap<String, usize> = HashMap::new();
    let mut files: Vec<String> = Vec::new();
    let mut provisional = Vec::with_capacity(violations.len());

    // First pass: provisional indices in first-seen order
    for violation in violations {
        let rule = *rule_slots.entry(violation.id.as_str()).or_insert_with(|| {
            accumulators.push(RuleAccumulator::new(violation));
            accumulators.len() - 1
        });
        accumulators[rule].observe(violation);

        let file = violation.file.as_deref().map(|raw| {
            let path = normalize_path(raw);
            match file_slots.get(&path) {
                Some(&i) => i,
                None => {
                    files.push(path.clone());
                    file_slots.insert(path, files.len() - 1);
                    files.len() - 1
                }
            }
        });

        provisional.push((rule, file, violation.range, violation.message.as_str()));
    }

    let rules: Vec<RuleDef> = accumulators
        .into_iter()
        .map(RuleAccumulator::finish)
        .collect();

    // Second pass: sort tables and remap every index
    let (rules, rule_remap) = sort_with_remap(rules, |a, b| a.id.cmp(&b.id));
    let (files, file_remap) = sort_with_remap(files, |a, b| a.cmp(b));

    let mut results: Vec<CompactResult> = provisional
        .into_iter()
        .map(|(rule, file, range, message)| {
            let rule = rule_remap[rule];
            CompactResult {
                rule,
                file: file.map(|f| file_remap[f]),
                range,
                message: MessageOverride::for_message(message, &rules[rule].message),
            }
        })
        .collect();
    results.sort();

    let groups = FindingGroups::build(&results);
    let summary = FindingsSummary::from_results(&rules, &results);

    FindingsGroup {
        rules,
        files,
        results,
        groups,
        summary,
    }
}

/// Resolve a compact result against the tables it was built with.
///
/// Returns `None` if an index is out of range for the given tables.
pub fn expand(result: &CompactResult, rules: &[RuleDef], files: &[String]) -> Option<Violation> {
    let rule = rules.get(result.rule)?;
    let file = match result.file {
        Some(i) => Some(files.get(i)?.clone()),
        None => None,
    };
    Some(Violation {
        id: rule.id.clone(),
        kind: rule.kind,
        severity: rule.severity,
        message: result.message.resolve(&rule.message).to_string(),
        file,
        range: result.range,
        docs_url: rule.docs_url.clone(),
        tags: rule.tags.clone(),
    })
}

/// Content-derived identity of a result: `ruleId|filePath|range|message`.
///
/// Identical for the same logical violation in any two groups, whatever
/// indices the tables assigned.
pub fn derive_result_key(
    result: &CompactResult,
    rules: &[RuleDef],
    files: &[String],
) -> Option<String> {
    let rule = rules.get(result.rule)?;
    let path = match result.file {
        Some(i) => files.get(i)?.as_str(),
        None => "",
    };
    let range = result.range.map(|r| r.to_string()).unwrap_or_default();
    Some(format!(
        "{}|{}|{}|{}",
        rule.id,
        path,
        range,
        result.message.resolve(&rule.message)
    ))
}
