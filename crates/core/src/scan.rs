//! Directory hashing: build a [`FileManifest`] from a tree on disk

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::{Result, UpdateError};
use crate::hash::ContentHash;
use crate::manifest::{FileManifest, SIDECAR_FILE};

/// Scanner that hashes every regular file under a root
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk builder that sees everything: no gitignore, no hidden-file
    /// filtering, symlinks not followed.
    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder.standard_filters(false).hidden(false).follow_links(false);
        builder
    }

    /// Hash the tree and return its manifest.
    ///
    /// Files that cannot be read are skipped with a warning. The root-level
    /// sidecar is never part of the manifest.
    ///
    /// # Errors
    /// Returns an error if the root itself cannot be traversed
    pub fn scan(&self) -> Result<FileManifest> {
        std::fs::read_dir(&self.root).map_err(|e| UpdateError::target(&self.root, &e))?;

        let mut manifest = FileManifest::new();
        let mut skipped = 0usize;

        for result in self.walk_builder().build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Some(relative) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            if relative == SIDECAR_FILE {
                continue;
            }

            match ContentHash::from_file(entry.path()) {
                Ok(hash) => {
                    manifest.insert(relative, hash.to_hex());
                }
                Err(e) => {
                    warn!(path = %relative, "skipping unreadable file: {e}");
                    skipped += 1;
                }
            }
        }

        debug!(
            root = %self.root.display(),
            files = manifest.len(),
            skipped,
            "hashed tree"
        );
        Ok(manifest)
    }

    /// List relative paths of regular files without hashing.
    ///
    /// Agrees with [`Self::scan`] on what the tree contains, so the sidecar
    /// is left out here too.
    ///
    /// # Errors
    /// Returns an error if the root itself cannot be traversed
    pub fn scan_paths(&self) -> Result<Vec<String>> {
        std::fs::read_dir(&self.root).map_err(|e| UpdateError::target(&self.root, &e))?;

        let mut paths: Vec<String> = self
            .walk_builder()
            .build()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|e| relative_key(&self.root, e.path()))
            .filter(|key| key != SIDECAR_FILE)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Manifest key for `path` under `root`: forward slashes, no leading slash.
///
/// Returns `None` for the root itself or paths outside it.
#[must_use]
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Join a manifest key onto a filesystem root using the host separator.
///
/// `.` and `..` segments are dropped so a key can never leave `root`.
#[must_use]
pub fn join_key(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !matches!(*part, "" | "." | ".."))
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let manifest = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.get("file1.txt"),
            Some(ContentHash::from_bytes(b"hello").to_hex().as_str())
        );
    }

    #[test]
    fn test_scan_nested_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/dir")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/dir/deep.txt"), "deep").unwrap();

        let manifest = Scanner::new(dir.path()).scan().unwrap();

        let paths: Vec<_> = manifest.paths().collect();
        assert_eq!(paths, vec!["root.txt", "sub/dir/deep.txt", "sub/nested.txt"]);
    }

    #[test]
    fn test_scan_includes_hidden_and_gitignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("run.log"), "log").unwrap();
        fs::write(dir.path().join(".env"), "x=1").unwrap();

        let manifest = Scanner::new(dir.path()).scan().unwrap();

        assert!(manifest.contains("run.log"));
        assert!(manifest.contains(".env"));
        assert!(manifest.contains(".gitignore"));
    }

    #[test]
    fn test_scan_skips_sidecar() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SIDECAR_FILE), "{}").unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/version.json"), "{}").unwrap();

        let manifest = Scanner::new(dir.path()).scan().unwrap();

        assert!(!manifest.contains(SIDECAR_FILE));
        assert!(manifest.contains("data/version.json"));
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let result = Scanner::new(dir.path().join("absent")).scan();
        assert!(matches!(result, Err(UpdateError::TargetUnreachable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.txt"), "ok").unwrap();
        let locked = dir.path().join("locked.txt");
        fs::write(&locked, "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; only assert the skip when the read fails
        let readable = fs::read(&locked).is_ok();
        let manifest = Scanner::new(dir.path()).scan().unwrap();

        assert!(manifest.contains("ok.txt"));
        assert_eq!(manifest.contains("locked.txt"), readable);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_scan_paths_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/x"), "").unwrap();
        fs::write(dir.path().join("a"), "").unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert_eq!(paths, vec!["a", "b/x"]);
    }

    #[test]
    fn test_scan_paths_matches_scan() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join(SIDECAR_FILE), "{}").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join(SIDECAR_FILE), "nested").unwrap();

        let scanner = Scanner::new(dir.path());
        let paths = scanner.scan_paths().unwrap();
        let scanned: Vec<_> = scanner.scan().unwrap().paths().map(ToString::to_string).collect();

        assert_eq!(paths, vec!["a.txt", "sub/version.json"]);
        assert_eq!(paths, scanned);
    }

    #[test]
    fn test_join_key_roundtrip() {
        let root = Path::new("/opt/app");
        let joined = join_key(root, "sub/dir/file.txt");
        assert_eq!(relative_key(root, &joined).as_deref(), Some("sub/dir/file.txt"));
        assert_eq!(relative_key(root, root), None);
    }

    #[test]
    fn test_join_key_stays_under_root() {
        let root = Path::new("/opt/app");
        assert_eq!(join_key(root, "../../etc/passwd"), root.join("etc").join("passwd"));
        assert_eq!(join_key(root, "./a//b"), root.join("a").join("b"));
    }
}
