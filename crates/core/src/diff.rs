//! Diff between an installed tree and a target manifest

use std::collections::BTreeSet;

use crate::manifest::FileManifest;

/// Classification of paths between an old and a new manifest.
///
/// `new`, `replace` and `remove` are pairwise disjoint and never contain a
/// path from `ignored`. Ignored paths are neither updated nor deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// In the target, absent locally
    pub new: BTreeSet<String>,
    /// In both, digest differs
    pub replace: BTreeSet<String>,
    /// Present locally, absent from the target
    pub remove: BTreeSet<String>,
    /// Excluded from every other set by pattern match
    pub ignored: BTreeSet<String>,
}

impl Diff {
    /// Compare two manifests, leaving ignored paths untouched.
    ///
    /// Pure: the result depends only on the three inputs.
    #[must_use]
    pub fn compute(old: &FileManifest, new: &FileManifest, ignored: &BTreeSet<String>) -> Self {
        let mut diff = Self {
            ignored: ignored.clone(),
            ..Self::default()
        };

        for (path, digest) in new.iter() {
            if ignored.contains(path) {
                continue;
            }
            match old.get(path) {
                None => {
                    diff.new.insert(path.to_string());
                }
                Some(old_digest) if old_digest != digest => {
                    diff.replace.insert(path.to_string());
                }
                Some(_) => {}
            }
        }

        for path in old.paths() {
            if !new.contains(path) && !ignored.contains(path) {
                diff.remove.insert(path.to_string());
            }
        }

        diff
    }

    /// Diff for a target that does not exist yet: everything is new.
    #[must_use]
    pub fn fresh(new: &FileManifest) -> Self {
        Self {
            new: new.paths().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Paths that must be fetched: `new ∪ replace`, in path order
    pub fn to_fetch(&self) -> impl Iterator<Item = &str> {
        self.new.union(&self.replace).map(String::as_str)
    }

    /// Number of paths that must be fetched
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.new.len() + self.replace.len()
    }

    /// Check if there are any changes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.replace.is_empty() && self.remove.is_empty()
    }

    /// Get total number of changes
    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.replace.len() + self.remove.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manifest(entries: &[(&str, &str)]) -> FileManifest {
        entries.iter().copied().collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_added_and_replaced() {
        let old = manifest(&[("a.txt", "h1"), ("b.txt", "h2")]);
        let new = manifest(&[("a.txt", "h1"), ("b.txt", "h3"), ("c.txt", "h4")]);

        let diff = Diff::compute(&old, &new, &BTreeSet::new());

        assert_eq!(diff.new, set(&["c.txt"]));
        assert_eq!(diff.replace, set(&["b.txt"]));
        assert!(diff.remove.is_empty());
    }

    #[test]
    fn test_ignored_file_neither_updated_nor_removed() {
        let old = manifest(&[("a.txt", "h1"), ("log/x.log", "h9")]);
        let new = manifest(&[("a.txt", "h2")]);

        let diff = Diff::compute(&old, &new, &set(&["log/x.log"]));

        assert!(diff.new.is_empty());
        assert_eq!(diff.replace, set(&["a.txt"]));
        assert!(diff.remove.is_empty());
        assert_eq!(diff.ignored, set(&["log/x.log"]));
    }

    #[test]
    fn test_ignored_changed_file_not_replaced() {
        let old = manifest(&[("config.json", "mine")]);
        let new = manifest(&[("config.json", "theirs")]);

        let diff = Diff::compute(&old, &new, &set(&["config.json"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_removed() {
        let old = manifest(&[("a.txt", "h1"), ("gone.txt", "h2")]);
        let new = manifest(&[("a.txt", "h1")]);

        let diff = Diff::compute(&old, &new, &BTreeSet::new());
        assert_eq!(diff.remove, set(&["gone.txt"]));
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn test_fresh_target() {
        let new = manifest(&[("1", "a"), ("2", "b"), ("3", "c"), ("4", "d"), ("5", "e")]);
        let diff = Diff::fresh(&new);

        assert_eq!(diff.new.len(), 5);
        assert!(diff.replace.is_empty());
        assert!(diff.remove.is_empty());
        assert_eq!(diff.fetch_count(), 5);
    }

    #[test]
    fn test_to_fetch_is_union() {
        let old = manifest(&[("b", "1")]);
        let new = manifest(&[("a", "1"), ("b", "2")]);
        let diff = Diff::compute(&old, &new, &BTreeSet::new());
        assert_eq!(diff.to_fetch().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    fn arb_manifest() -> impl Strategy<Value = FileManifest> {
        prop::collection::btree_map("[a-e]{1,2}(/[a-e]{1,2})?", "h[0-3]", 0..24)
            .prop_map(|m| m.into_iter().collect())
    }

    fn arb_ignored() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("[a-e]{1,2}(/[a-e]{1,2})?", 0..8)
    }

    proptest! {
        #[test]
        fn prop_self_diff_is_empty(a in arb_manifest()) {
            let diff = Diff::compute(&a, &a, &BTreeSet::new());
            prop_assert!(diff.new.is_empty());
            prop_assert!(diff.replace.is_empty());
            prop_assert!(diff.remove.is_empty());
        }

        #[test]
        fn prop_sets_disjoint_and_respect_ignores(
            a in arb_manifest(),
            b in arb_manifest(),
            ignored in arb_ignored(),
        ) {
            let diff = Diff::compute(&a, &b, &ignored);
            prop_assert!(diff.new.is_disjoint(&diff.replace));
            prop_assert!(diff.remove.is_disjoint(&diff.new));
            prop_assert!(diff.remove.is_disjoint(&diff.replace));
            for path in &ignored {
                prop_assert!(!diff.new.contains(path));
                prop_assert!(!diff.replace.contains(path));
                prop_assert!(!diff.remove.contains(path));
            }
        }

        #[test]
        fn prop_applying_diff_reaches_target(a in arb_manifest(), b in arb_manifest()) {
            let diff = Diff::compute(&a, &b, &BTreeSet::new());
            let mut applied = a.clone();
            for path in &diff.remove {
                applied.remove(path);
            }
            for path in diff.to_fetch() {
                applied.insert(path, b.get(path).unwrap());
            }
            prop_assert_eq!(&applied, &b);
            prop_assert!(Diff::compute(&applied, &b, &BTreeSet::new()).is_empty());
        }

        #[test]
        fn prop_deterministic(a in arb_manifest(), b in arb_manifest(), ignored in arb_ignored()) {
            prop_assert_eq!(Diff::compute(&a, &b, &ignored), Diff::compute(&a, &b, &ignored));
        }
    }
}
