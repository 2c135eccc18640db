//! Staging area: downloaded files waiting to be promoted into the live tree
//!
//! Layout is `<root>/<version>/<relative path>`. Files only ever appear
//! complete: they are written under a temporary name in the destination
//! directory and renamed into place. The area is never cleaned up here, so
//! it doubles as a resume cache across runs.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::scan::join_key;

/// Prefix of in-flight temporary files
pub(crate) const TEMP_PREFIX: &str = ".upsync-partial-";

/// Staging directory for one version
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Staging area for `version` under `root`. Nothing is created until the
    /// first write.
    #[must_use]
    pub fn new(root: &Path, version: &str) -> Self {
        Self {
            dir: root.join(version),
        }
    }

    /// Directory holding this version's files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path for a manifest key
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        join_key(&self.dir, key)
    }

    /// Whether a complete copy of `key` is already staged
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Atomically stage `data` under `key`.
    ///
    /// Safe to call concurrently for distinct keys; racing parent-directory
    /// creation is tolerated.
    ///
    /// # Errors
    /// Returns an error if the directory, temp file, or rename fails
    pub fn write(&self, key: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        let dest = self.path_for(key);
        let parent = dest.parent().unwrap_or(&self.dir);
        create_dir_all_racy(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(dest)
    }
}

/// `create_dir_all` that treats a concurrent creator winning as success
pub(crate) fn create_dir_all_racy(dir: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path(), "v1");
        assert!(!staging.contains("a/b/c.txt"));

        let path = staging.write("a/b/c.txt", b"content").unwrap();

        assert_eq!(path, dir.path().join("v1").join("a").join("b").join("c.txt"));
        assert!(staging.contains("a/b/c.txt"));
        assert_eq!(std::fs::read(path).unwrap(), b"content");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path(), "v1");
        staging.write("x.bin", b"1").unwrap();
        staging.write("x.bin", b"2").unwrap();

        let names: Vec<_> = std::fs::read_dir(staging.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.bin"]);
        assert_eq!(std::fs::read(staging.path_for("x.bin")).unwrap(), b"2");
    }

    #[test]
    fn test_versions_are_separate() {
        let dir = TempDir::new().unwrap();
        StagingArea::new(dir.path(), "v1").write("f", b"1").unwrap();
        assert!(!StagingArea::new(dir.path(), "v2").contains("f"));
    }

    #[test]
    fn test_concurrent_writes_share_parents() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path(), "v1");

        std::thread::scope(|s| {
            for i in 0..8 {
                let staging = &staging;
                s.spawn(move || {
                    staging
                        .write(&format!("deep/shared/dir/file{i}"), b"x")
                        .unwrap();
                });
            }
        });

        for i in 0..8 {
            assert!(staging.contains(&format!("deep/shared/dir/file{i}")));
        }
    }
}
