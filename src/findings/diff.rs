//! Diff two findings groups by stable result key
//!
//! Shows added and removed violations between two snapshots. Matching is by
//! content key only; result indices differ between groups and are never
//! compared.

use super::FindingsGroup;
use crate::models::Violation;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of diffing two findings groups.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingsDiff {
    /// Present in `after` but not in `before`
    pub added: Vec<Violation>,
    /// Present in `before` but not in `after`
    pub removed: Vec<Violation>,
    /// Keys present in both
    pub unchanged: usize,
}

impl FindingsDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn keyed(group: &FindingsGroup) -> BTreeMap<String, Violation> {
    group
        .keys()
        .filter_map(|(key, result)| group.expand(result).map(|v| (key, v)))
        .collect()
}

/// Compute the set difference between two groups' result keys.
pub fn diff_findings(before: &FindingsGroup, after: &FindingsGroup) -> FindingsDiff {
    let before_keys = keyed(before);
    let after_keys = keyed(after);

    let added: Vec<Violation> = after_keys
        .iter()
        .filter(|(k, _)| !before_keys.contains_key(*k))
        .map(|(_, v)| v.clone())
        .collect();

    let removed: Vec<Violation> = before_keys
        .iter()
        .filter(|(k, _)| !after_keys.contains_key(*k))
        .map(|(_, v)| v.clone())
        .collect();

    let unchanged = after_keys
        .keys()
        .filter(|k| before_keys.contains_key(*k))
        .count();

    FindingsDiff {
        added,
        removed,
        unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::normalize;
    use crate::models::{Severity, SourceRange};

    fn make_violation(id: &str, file: &str, line: u32) -> Violation {
        Violation {
            id: id.to_string(),
            file: Some(file.to_string()),
            range: Some(SourceRange::new(line, 0, line, 10)),
            severity: Severity::Warning,
            message: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_diff_added_and_removed() {
        let before = normalize(&[
            make_violation("no-moment", "src/foo.ts", 10),
            make_violation("no-axios", "src/bar.ts", 20),
        ]);
        let after = normalize(&[
            make_violation("no-moment", "src/foo.ts", 10),
            make_violation("no-jquery", "src/web.ts", 5),
        ]);

        let diff = diff_findings(&before, &after);

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].id, "no-jquery");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].id, "no-axios");
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_diff_ignores_index_shift() {
        // Adding a rule that sorts first shifts every index in `after`
        let before = normalize(&[make_violation("m-rule", "src/b.ts", 1)]);
        let after = normalize(&[
            make_violation("a-rule", "src/a.ts", 1),
            make_violation("m-rule", "src/b.ts", 1),
        ]);
        assert_ne!(before.results()[0], after.results()[1]);

        let diff = diff_findings(&before, &after);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].id, "a-rule");
    }

    #[test]
    fn test_moved_line_is_add_and_remove() {
        let before = normalize(&[make_violation("no-moment", "src/foo.ts", 10)]);
        let after = normalize(&[make_violation("no-moment", "src/foo.ts", 11)]);
        let diff = diff_findings(&before, &after);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
    }

    #[test]
    fn test_diff_no_changes() {
        let group = normalize(&[make_violation("no-moment", "src/foo.ts", 10)]);
        let diff = diff_findings(&group, &group);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, 1);
    }
}
