//! Manifests: a complete tree state as relative path -> digest

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// Name of the manifest file, both on the mirror and as a local sidecar
pub const SIDECAR_FILE: &str = "version.json";

/// Mapping from relative path (forward slashes, no leading slash) to digest.
///
/// Keys never name directories. Ordering is irrelevant to its meaning; a
/// `BTreeMap` just keeps iteration deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileManifest {
    files: BTreeMap<String, String>,
}

impl FileManifest {
    /// Create an empty manifest
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path and its digest, returning the previous digest if any
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) -> Option<String> {
        self.files.insert(path.into(), digest.into())
    }

    /// Remove a path
    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    /// Get the digest for a path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Check whether a path is present
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate over (path, digest) pairs in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    /// Iterate over paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl<P: Into<String>, D: Into<String>> FromIterator<(P, D)> for FileManifest {
    fn from_iter<I: IntoIterator<Item = (P, D)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(p, d)| (p.into(), d.into()))
                .collect(),
        }
    }
}

/// The `version.json` document: publish time plus the file manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// ISO-8601 publish timestamp, kept verbatim
    pub time: String,
    /// Relative path -> digest
    pub hash: FileManifest,
}

impl VersionManifest {
    /// Create a manifest stamped with the current local time
    #[must_use]
    pub fn stamped_now(hash: FileManifest) -> Self {
        Self {
            time: Local::now().to_rfc3339(),
            hash,
        }
    }

    /// Hash the tree at `root` and stamp it for publishing.
    ///
    /// The sidecar itself is never part of the result.
    ///
    /// # Errors
    /// Returns an error if the root cannot be read
    pub fn publish(root: &Path) -> Result<Self> {
        let hash = crate::scan::Scanner::new(root).scan()?;
        tracing::info!(root = %root.display(), files = hash.len(), "hashed tree for publishing");
        Ok(Self::stamped_now(hash))
    }

    /// Parse a manifest from JSON, dropping any entry for the sidecar itself.
    ///
    /// # Errors
    /// Returns an error if the document is not a valid manifest
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        let mut manifest: Self = serde_json::from_slice(data)?;
        manifest.hash.remove(SIDECAR_FILE);
        Ok(manifest)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Parse the publish time.
    ///
    /// Accepts RFC 3339 with an offset, or a naive timestamp (interpreted as
    /// UTC) as written by older publishers.
    #[must_use]
    pub fn published_at(&self) -> Option<DateTime<FixedOffset>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(&self.time) {
            return Some(t);
        }
        NaiveDateTime::parse_from_str(&self.time, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    }

    /// Read the sidecar from an installation root.
    ///
    /// Returns `None` when there is no sidecar or it cannot be parsed; an
    /// untrustworthy sidecar just means the tree gets rehashed.
    #[must_use]
    pub fn read_sidecar(root: &Path) -> Option<Self> {
        let path = root.join(SIDECAR_FILE);
        let data = std::fs::read(&path).ok()?;
        match Self::from_json(&data) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable sidecar: {e}");
                None
            }
        }
    }

    /// Write this manifest as the sidecar of an installation root
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn write_sidecar(&self, root: &Path) -> Result<()> {
        let json = self
            .to_json()
            .map_err(|e| UpdateError::Config(format!("cannot encode manifest: {e}")))?;
        std::fs::write(root.join(SIDECAR_FILE), json)?;
        Ok(())
    }

    /// Remove the sidecar from an installation root, if present
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed
    pub fn clear_sidecar(root: &Path) -> Result<()> {
        match std::fs::remove_file(root.join(SIDECAR_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::target(root, &e)),
        }
    }
}

/// A published version: identifier plus its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Directory name on the mirror
    pub name: String,
    /// Publish time and file manifest
    pub manifest: VersionManifest,
}

impl Version {
    /// Create a version
    #[must_use]
    pub fn new(name: impl Into<String>, manifest: VersionManifest) -> Self {
        Self {
            name: name.into(),
            manifest,
        }
    }

    /// File manifest of this version
    #[must_use]
    pub fn files(&self) -> &FileManifest {
        &self.manifest.hash
    }

    /// Name shown in listings, e.g. `v2.1 (2024-03-01 10:00)`.
    ///
    /// The time is shown in the publisher's offset; an unparseable
    /// timestamp is shown verbatim.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.manifest.published_at() {
            Some(t) => format!("{} ({})", self.name, t.format("%Y-%m-%d %H:%M")),
            None => format!("{} ({})", self.name, self.manifest.time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_remote_manifest() {
        let json = br#"{
            "time": "2024-03-01T10:00:00.123456+08:00",
            "hash": {"a.txt": "h1", "dir/b.txt": "h2", "version.json": "h3"},
            "extra": 1
        }"#;
        let manifest = VersionManifest::from_json(json).unwrap();
        assert_eq!(manifest.hash.len(), 2);
        assert_eq!(manifest.hash.get("dir/b.txt"), Some("h2"));
        assert!(!manifest.hash.contains(SIDECAR_FILE));
        assert!(manifest.published_at().is_some());
    }

    #[test]
    fn test_parse_missing_hash_fails() {
        assert!(VersionManifest::from_json(br#"{"time": "x"}"#).is_err());
    }

    #[test]
    fn test_naive_timestamp() {
        let manifest = VersionManifest {
            time: "2023-11-05T08:30:00.5".to_string(),
            hash: FileManifest::new(),
        };
        let t = manifest.published_at().unwrap();
        assert_eq!(t.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_sidecar_lifecycle() {
        let dir = TempDir::new().unwrap();
        assert!(VersionManifest::read_sidecar(dir.path()).is_none());

        let manifest = VersionManifest::stamped_now([("a.txt", "h1")].into_iter().collect());
        manifest.write_sidecar(dir.path()).unwrap();
        assert_eq!(VersionManifest::read_sidecar(dir.path()), Some(manifest));

        VersionManifest::clear_sidecar(dir.path()).unwrap();
        assert!(!dir.path().join(SIDECAR_FILE).exists());
        // Clearing twice is fine
        VersionManifest::clear_sidecar(dir.path()).unwrap();
    }

    #[test]
    fn test_corrupt_sidecar_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SIDECAR_FILE), "not json").unwrap();
        assert!(VersionManifest::read_sidecar(dir.path()).is_none());
    }

    #[test]
    fn test_publish_excludes_sidecar() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), "world").unwrap();
        std::fs::write(dir.path().join(SIDECAR_FILE), "{}").unwrap();

        let manifest = VersionManifest::publish(dir.path()).unwrap();

        assert_eq!(manifest.hash.paths().collect::<Vec<_>>(), vec!["a.txt", "sub/b.txt"]);
        assert!(manifest.published_at().is_some());

        manifest.write_sidecar(dir.path()).unwrap();
        assert_eq!(VersionManifest::publish(dir.path()).unwrap().hash, manifest.hash);
    }

    #[test]
    fn test_display_name() {
        let version = Version::new(
            "v1.2",
            VersionManifest {
                time: "2024-01-01T00:00:00+00:00".to_string(),
                hash: FileManifest::new(),
            },
        );
        assert_eq!(version.display_name(), "v1.2 (2024-01-01 00:00)");

        let odd = Version::new(
            "v1.3",
            VersionManifest {
                time: "last tuesday".to_string(),
                hash: FileManifest::new(),
            },
        );
        assert_eq!(odd.display_name(), "v1.3 (last tuesday)");
    }
}
