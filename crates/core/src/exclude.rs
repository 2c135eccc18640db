//! Ignore-pattern resolution against an installation tree
//!
//! Patterns use shell-glob syntax with `**` for recursive descent and are
//! anchored at the install root: `*.yml` matches `a.yml` but not `sub/a.yml`,
//! while `**/*.yml` matches both. A pattern that matches a directory
//! excludes everything beneath it.
//!
//! The result is the union of what each pattern matches, whatever their
//! order. There is no negation: a leading `!` is an ordinary character.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

use crate::error::{Result, UpdateError};
use crate::scan::relative_key;

/// Compiled set of ignore patterns for one root
pub struct IgnoreMatcher {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoreMatcher {
    /// Compile patterns for the given root.
    ///
    /// Blank lines and `#` comments are skipped.
    ///
    /// # Errors
    /// Returns an error if a pattern is not a valid glob
    pub fn new(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            builder
                .add_line(None, &anchor(pattern))
                .map_err(|e| UpdateError::Config(format!("invalid ignore pattern {pattern:?}: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| UpdateError::Config(format!("cannot build ignore set: {e}")))?;
        Ok(Self { root, matcher })
    }

    /// Check a manifest key against the patterns (including its parents)
    #[must_use]
    pub fn is_ignored(&self, key: &str, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(Path::new(key), is_dir)
            .is_ignore()
    }

    /// Resolve the patterns against the filesystem.
    ///
    /// Returns every regular file and symlink under the root that is
    /// ignored, keyed the same way as manifests. Symlinks are not followed.
    /// A missing root resolves to the empty set.
    #[must_use]
    pub fn resolve(&self) -> BTreeSet<String> {
        let mut ignored = BTreeSet::new();
        if self.matcher.is_empty() || !self.root.is_dir() {
            return ignored;
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping entry during ignore resolution: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file() || t.is_symlink()) {
                continue;
            }
            let Some(key) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            if self.is_ignored(&key, false) {
                ignored.insert(key);
            }
        }

        debug!(root = %self.root.display(), ignored = ignored.len(), "resolved ignore set");
        ignored
    }
}

/// Convenience: compile and resolve in one step
///
/// # Errors
/// Returns an error if a pattern is invalid
pub fn resolve(root: &Path, patterns: &[String]) -> Result<BTreeSet<String>> {
    Ok(IgnoreMatcher::new(root, patterns)?.resolve())
}

/// Anchor a pattern to the root so it is not matched at every depth.
///
/// Every output starts with `/` or `**`, so gitignore never reads a
/// leading `!` as a whitelist.
fn anchor(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    if pattern.starts_with('/') || pattern.starts_with("**") {
        pattern
    } else {
        format!("/{pattern}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn tree(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file).unwrap();
        }
        dir
    }

    #[test]
    fn test_top_level_glob_is_anchored() {
        let dir = tree(&["conf.yml", "sub/other.yml", "main.py"]);
        let ignored = resolve(dir.path(), &patterns(&["*.yml"])).unwrap();
        assert_eq!(ignored, BTreeSet::from(["conf.yml".to_string()]));
    }

    #[test]
    fn test_double_star_recurses() {
        let dir = tree(&["screenshot/a.png", "screenshot/2024/b.png", "keep.png"]);
        let ignored = resolve(dir.path(), &patterns(&["screenshot/**/*"])).unwrap();
        assert!(ignored.contains("screenshot/a.png"));
        assert!(ignored.contains("screenshot/2024/b.png"));
        assert!(!ignored.contains("keep.png"));
    }

    #[test]
    fn test_leading_double_star() {
        let dir = tree(&["a.log", "x/y/b.log", "c.txt"]);
        let ignored = resolve(dir.path(), &patterns(&["**/*.log"])).unwrap();
        assert_eq!(ignored.len(), 2);
    }

    #[test]
    fn test_directory_match_excludes_contents() {
        let dir = tree(&["log/a.log", "log/old/b.log", "main.py"]);
        let ignored = resolve(dir.path(), &patterns(&["log/*"])).unwrap();
        // log/old matches the pattern as a directory, so its files go too
        assert!(ignored.contains("log/a.log"));
        assert!(ignored.contains("log/old/b.log"));
        assert!(!ignored.contains("main.py"));
    }

    #[test]
    fn test_bare_directory_name() {
        let dir = tree(&["tmp/x", "tmp/y/z", "tmpfile"]);
        let ignored = resolve(dir.path(), &patterns(&["tmp"])).unwrap();
        assert_eq!(ignored.len(), 2);
        assert!(!ignored.contains("tmpfile"));
    }

    #[test]
    fn test_order_irrelevant_union() {
        let dir = tree(&["a.yml", "b.json", "c.txt"]);
        let one = resolve(dir.path(), &patterns(&["*.yml", "*.json"])).unwrap();
        let two = resolve(dir.path(), &patterns(&["*.json", "*.yml"])).unwrap();
        assert_eq!(one, two);
        assert_eq!(one.len(), 2);
    }

    #[test]
    fn test_bang_is_literal_and_order_free() {
        let dir = tree(&["a.yml", "b.yml", "!c.txt", "d.txt"]);
        let one = resolve(dir.path(), &patterns(&["*.yml", "!a.yml", "!c.txt"])).unwrap();
        let two = resolve(dir.path(), &patterns(&["!c.txt", "!a.yml", "*.yml"])).unwrap();
        assert_eq!(one, two);
        assert_eq!(
            one,
            BTreeSet::from(["!c.txt".to_string(), "a.yml".to_string(), "b.yml".to_string()])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_resolved_without_following() {
        let dir = tree(&["real/settings.yml", "main.py"]);
        std::os::unix::fs::symlink("real/settings.yml", dir.path().join("settings.yml")).unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("linked")).unwrap();

        let ignored = resolve(dir.path(), &patterns(&["*.yml", "linked"])).unwrap();

        assert_eq!(
            ignored,
            BTreeSet::from(["linked".to_string(), "settings.yml".to_string()])
        );
    }

    #[test]
    fn test_new_file_is_ignored_without_diffing() {
        let dir = tree(&["main.py"]);
        let matcher = IgnoreMatcher::new(dir.path(), &patterns(&["*.json"])).unwrap();
        assert!(matcher.resolve().is_empty());

        fs::write(dir.path().join("settings.json"), "{}").unwrap();
        assert!(matcher.resolve().contains("settings.json"));
    }

    #[test]
    fn test_missing_root_and_empty_patterns() {
        let dir = TempDir::new().unwrap();
        let absent = dir.path().join("absent");
        assert!(resolve(&absent, &patterns(&["*"])).unwrap().is_empty());

        let dir = tree(&["a"]);
        assert!(resolve(dir.path(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let dir = tree(&["a.yml"]);
        let ignored = resolve(dir.path(), &patterns(&["# comment", "  ", "*.yml"])).unwrap();
        assert_eq!(ignored.len(), 1);
    }

    #[test]
    fn test_is_ignored_key() {
        let dir = TempDir::new().unwrap();
        let matcher = IgnoreMatcher::new(dir.path(), &patterns(&["adb-buildin/*"])).unwrap();
        assert!(matcher.is_ignored("adb-buildin/adb", false));
        assert!(!matcher.is_ignored("bin/adb", false));
    }
}
