//! Local-filesystem mirror
//!
//! Same layout as a published HTTP mirror: `<root>/<version>/version.json`,
//! `<root>/<version>/<files>` and `<root>/<version>.zip`. Used for testing
//! and for installing from removable media.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use upsync_core::scan::join_key;
use upsync_core::{Mirror, Result, SIDECAR_FILE, UpdateError, VersionManifest};

/// Mirror rooted in a local directory
pub struct LocalMirror {
    root: PathBuf,
    display: String,
}

impl LocalMirror {
    /// Create a mirror over `root`. Nothing is read until the first call.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            display: root.display().to_string(),
            root,
        }
    }

    /// Mirror root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish `source` as `version`: copy the tree, write its manifest and
    /// (when `archive` is given) place the bulk archive beside it.
    ///
    /// # Errors
    /// Returns an error if the source cannot be hashed or copied
    pub fn publish(&self, version: &str, source: &Path, archive: Option<&[u8]>) -> Result<VersionManifest> {
        let manifest = VersionManifest::publish(source)?;
        let dest = self.root.join(version);
        for key in manifest.hash.paths() {
            let to = join_key(&dest, key);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(join_key(source, key), to)?;
        }
        std::fs::create_dir_all(&dest)?;
        manifest.write_sidecar(&dest)?;
        if let Some(archive) = archive {
            std::fs::write(self.root.join(format!("{version}.zip")), archive)?;
        }
        debug!(version, files = manifest.hash.len(), "published to local mirror");
        Ok(manifest)
    }
}

#[async_trait]
impl Mirror for LocalMirror {
    fn base(&self) -> &str {
        &self.display
    }

    async fn list_versions(&self) -> Result<Vec<String>> {
        let unreachable = |e: io::Error| UpdateError::MirrorUnreachable {
            url: self.display.clone(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(unreachable)?;
        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unreachable)? {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn fetch_manifest(&self, version: &str) -> Result<VersionManifest> {
        let path = join_key(&self.root, version).join(SIDECAR_FILE);
        let unavailable = |reason: String| UpdateError::VersionUnavailable {
            version: version.to_string(),
            reason,
        };

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        VersionManifest::from_json(&data).map_err(|e| unavailable(format!("malformed manifest: {e}")))
    }

    async fn fetch_file(&self, version: &str, path: &str) -> Result<Bytes> {
        let file = join_key(&join_key(&self.root, version), path);
        tokio::fs::read(&file)
            .await
            .map(Bytes::from)
            .map_err(|e| UpdateError::DownloadFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_archive(&self, version: &str) -> Result<Bytes> {
        let name = format!("{version}.zip");
        tokio::fs::read(self.root.join(&name))
            .await
            .map(Bytes::from)
            .map_err(|e| UpdateError::DownloadFailed {
                path: name.clone(),
                reason: e.to_string(),
            })
    }
}
