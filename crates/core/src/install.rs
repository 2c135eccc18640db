//! Applying a diff to the installation root
//!
//! Two strategies exist. The incremental path deletes `remove`, then promotes
//! every staged `new ∪ replace` file into the live tree. The full reinstall
//! path downloads the version archive, extracts it next to the target,
//! carries ignored files across and swaps the directories. Either way the
//! sidecar is cleared before the first mutation and only rewritten when the
//! run recorded no failures.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::config::UpdaterConfig;
use crate::diff::Diff;
use crate::error::{FailureRecord, Operation, Result, UpdateError};
use crate::exclude;
use crate::manifest::{FileManifest, SIDECAR_FILE, Version, VersionManifest};
use crate::mirror::Mirror;
use crate::scan::join_key;
use crate::staging::{StagingArea, TEMP_PREFIX, create_dir_all_racy};

/// Installation root plus the patterns that protect user files in it
#[derive(Debug, Clone)]
pub struct InstallTarget {
    /// Root directory
    pub root: PathBuf,
    /// Ignore patterns anchored at `root`
    pub ignores: Vec<String>,
}

/// What is currently at the install root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Nothing at the path
    Missing,
    /// Directory with no entries
    Empty,
    /// Directory with at least one entry
    Populated,
}

impl InstallTarget {
    /// Create a target
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ignores: Vec<String>) -> Self {
        Self {
            root: root.into(),
            ignores,
        }
    }

    /// Target described by a config file
    #[must_use]
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self::new(config.install_dir.clone(), config.ignores.clone())
    }

    /// Inspect the root.
    ///
    /// # Errors
    /// Returns [`UpdateError::TargetUnreachable`] if the root is not a
    /// directory or cannot be listed
    pub fn state(&self) -> Result<TargetState> {
        match fs::read_dir(&self.root) {
            Ok(mut entries) => Ok(if entries.next().is_some() {
                TargetState::Populated
            } else {
                TargetState::Empty
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(TargetState::Missing),
            Err(e) => Err(UpdateError::target(&self.root, &e)),
        }
    }

    /// Files under the root matched by the ignore patterns
    ///
    /// # Errors
    /// Returns an error if a pattern is invalid
    pub fn ignored(&self) -> Result<BTreeSet<String>> {
        exclude::resolve(&self.root, &self.ignores)
    }
}

/// How a diff is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Delete removed files, promote staged ones
    Incremental,
    /// Replace the whole tree from the version archive
    FullReinstall,
}

impl std::fmt::Display for InstallPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::FullReinstall => write!(f, "full reinstall"),
        }
    }
}

/// Pick a strategy: an absent or empty target, or a `new` set of at least
/// `threshold` files, goes through the archive.
#[must_use]
pub fn choose_policy(state: TargetState, diff: &Diff, threshold: usize) -> InstallPolicy {
    match state {
        TargetState::Missing | TargetState::Empty => InstallPolicy::FullReinstall,
        TargetState::Populated if diff.new.len() >= threshold => InstallPolicy::FullReinstall,
        TargetState::Populated => InstallPolicy::Incremental,
    }
}

/// Applies diffs to an install target
pub struct InstallExecutor<M: ?Sized> {
    mirror: Arc<M>,
    threshold: usize,
}

impl<M: Mirror + ?Sized> InstallExecutor<M> {
    /// Create an executor; `threshold` is the full-reinstall cutoff
    #[must_use]
    pub fn new(mirror: Arc<M>, threshold: usize) -> Self {
        Self { mirror, threshold }
    }

    /// Strategy for applying `diff` to a target in `state`
    #[must_use]
    pub fn policy(&self, state: TargetState, diff: &Diff) -> InstallPolicy {
        choose_policy(state, diff, self.threshold)
    }

    /// Apply `diff` from already-staged files.
    ///
    /// `download_failures` are the paths the fetch batch could not stage:
    /// they are skipped, reported first, and keep the sidecar from being
    /// written. Per-file failures are returned, never raised.
    ///
    /// # Errors
    /// Fails only if the existing sidecar cannot be cleared
    pub async fn incremental(
        &self,
        version: &Version,
        target: &InstallTarget,
        diff: &Diff,
        staging: &StagingArea,
        download_failures: Vec<FailureRecord>,
    ) -> Result<Vec<FailureRecord>> {
        let version = version.clone();
        let root = target.root.clone();
        let diff = diff.clone();
        let staging = staging.clone();
        tokio::task::spawn_blocking(move || {
            apply_incremental(&version, &root, &diff, &staging, download_failures)
        })
        .await
        .map_err(|e| UpdateError::Io(io::Error::other(e)))?
    }

    /// Replace the target with the contents of the version archive.
    ///
    /// The archive is fully downloaded before anything on disk changes.
    ///
    /// # Errors
    /// Fails if the archive cannot be fetched or extracted, or if the
    /// directory swap fails; in the latter case the old tree is restored
    pub async fn reinstall(&self, version: &Version, target: &InstallTarget) -> Result<Vec<FailureRecord>> {
        info!(version = %version.name, "downloading archive");
        let archive = self.mirror.fetch_archive(&version.name).await?;
        debug!(bytes = archive.len(), "archive downloaded");

        let version = version.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || swap_in_archive(archive, &version, &target))
            .await
            .map_err(|e| UpdateError::Io(io::Error::other(e)))?
    }

    /// Apply `diff` with the given strategy.
    ///
    /// A full reinstall ignores `diff`, `staging` and `download_failures`.
    ///
    /// # Errors
    /// See [`Self::incremental`] and [`Self::reinstall`]
    pub async fn execute(
        &self,
        policy: InstallPolicy,
        version: &Version,
        target: &InstallTarget,
        diff: &Diff,
        staging: &StagingArea,
        download_failures: Vec<FailureRecord>,
    ) -> Result<Vec<FailureRecord>> {
        match policy {
            InstallPolicy::Incremental => {
                self.incremental(version, target, diff, staging, download_failures)
                    .await
            }
            InstallPolicy::FullReinstall => self.reinstall(version, target).await,
        }
    }
}

fn apply_incremental(
    version: &Version,
    root: &Path,
    diff: &Diff,
    staging: &StagingArea,
    download_failures: Vec<FailureRecord>,
) -> Result<Vec<FailureRecord>> {
    VersionManifest::clear_sidecar(root)?;
    let not_staged: BTreeSet<String> = download_failures.iter().map(|f| f.path.clone()).collect();
    let mut failures = download_failures;

    for key in &diff.remove {
        if let Err(e) = remove_installed(root, key) {
            warn!(path = %key, "{e}");
            failures.push(FailureRecord::from_error(key.as_str(), Operation::Delete, e));
        }
    }

    for key in diff.to_fetch().filter(|key| !not_staged.contains(*key)) {
        match promote(staging, root, key) {
            Ok(()) => debug!(path = %key, "installed"),
            Err(e) => {
                warn!(path = %key, "promote failed: {e}");
                failures.push(FailureRecord::new(key, Operation::Promote, e));
            }
        }
    }

    finish_sidecar(version, root, &mut failures);
    info!(
        removed = diff.remove.len(),
        installed = diff.fetch_count(),
        failed = failures.len(),
        "incremental install finished"
    );
    Ok(failures)
}

/// Delete one installed file; an already-absent file counts as removed
fn remove_installed(root: &Path, key: &str) -> Result<()> {
    let path = join_key(root, key);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %key, "removed");
            prune_empty_parents(root, &path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %key, "already absent");
            Ok(())
        }
        Err(e) => Err(UpdateError::DeleteFailed {
            path: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Copy a staged file into the live tree without exposing a partial file
fn promote(staging: &StagingArea, root: &Path, key: &str) -> io::Result<()> {
    let src = staging.path_for(key);
    if !src.is_file() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "file was not staged"));
    }

    let dest = join_key(root, key);
    let parent = dest.parent().unwrap_or(root);
    create_dir_all_racy(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    let mut reader = fs::File::open(&src)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file().set_permissions(reader.metadata()?.permissions())?;
    tmp.persist(&dest).map_err(|e| e.error)?;
    Ok(())
}

/// Remove directories left empty by a deletion, stopping at `root`
fn prune_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

fn swap_in_archive(archive: Bytes, version: &Version, target: &InstallTarget) -> Result<Vec<FailureRecord>> {
    let root = &target.root;
    let parent = parent_dir(root);
    create_dir_all_racy(&parent).map_err(|e| UpdateError::target(&parent, &e))?;

    let scratch = tempfile::Builder::new()
        .prefix(".upsync-extract-")
        .tempdir_in(&parent)
        .map_err(|e| UpdateError::target(&parent, &e))?;
    let extract_dir = scratch.path().join("tree");

    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| UpdateError::Archive(format!("{}.zip: {e}", version.name)))?;
    info!(entries = zip.len(), "extracting archive");
    zip.extract(&extract_dir)
        .map_err(|e| UpdateError::Archive(format!("{}.zip: {e}", version.name)))?;
    let fresh = locate_tree(&extract_dir, version.files())?;

    let mut failures = Vec::new();

    if root.exists() {
        // Every ignored file must reach the new tree before the old one goes
        let preserved = target.ignored()?;
        for key in &preserved {
            if let Err(e) = carry_over(root, &fresh, key) {
                error!(
                    path = %key,
                    "cannot preserve ignored file, keeping current installation: {e}"
                );
                return Err(UpdateError::TargetUnreachable {
                    path: join_key(root, key),
                    reason: format!("cannot carry ignored file into the new tree: {e}"),
                });
            }
        }
        debug!(preserved = preserved.len(), "carried ignored files into new tree");

        VersionManifest::clear_sidecar(root)?;

        let graveyard = tempfile::Builder::new()
            .prefix(".upsync-old-")
            .tempdir_in(&parent)
            .map_err(|e| UpdateError::target(&parent, &e))?;
        let old = graveyard.path().join("tree");

        fs::rename(root, &old).map_err(|e| UpdateError::target(root, &e))?;
        if let Err(e) = fs::rename(&fresh, root) {
            if let Err(restore) = fs::rename(&old, root) {
                error!(
                    old = %old.display(),
                    "cannot restore previous installation: {restore}"
                );
                // Keep the old tree on disk for manual recovery
                let _ = graveyard.keep();
            }
            return Err(UpdateError::target(root, &e));
        }

        let old_display = old.display().to_string();
        if let Err(e) = graveyard.close() {
            warn!(path = %old_display, "cannot remove previous installation: {e}");
            failures.push(FailureRecord::new(old_display, Operation::Delete, e));
        }
    } else {
        fs::rename(&fresh, root).map_err(|e| UpdateError::target(root, &e))?;
    }

    finish_sidecar(version, root, &mut failures);
    info!(version = %version.name, failed = failures.len(), "full reinstall finished");
    Ok(failures)
}

/// Archives either hold the files at their root or inside a single
/// top-level directory; pick whichever contains the manifest's files.
fn locate_tree(extract_dir: &Path, files: &FileManifest) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(extract_dir)
        .map_err(|e| UpdateError::Archive(format!("cannot read extracted archive: {e}")))?
        .filter_map(std::result::Result::ok)
        .collect();

    let nested = match entries.as_slice() {
        [only] if only.file_type().is_ok_and(|t| t.is_dir()) => Some(only.path()),
        _ => None,
    };
    let Some(nested) = nested else {
        return Ok(extract_dir.to_path_buf());
    };

    let probe = files.paths().find(|key| *key != SIDECAR_FILE);
    match probe {
        Some(key) if join_key(extract_dir, key).is_file() => Ok(extract_dir.to_path_buf()),
        _ => Ok(nested),
    }
}

/// Copy an ignored entry into the new tree. Symlinks are recreated, not
/// followed, and replace whatever the archive shipped at that path.
fn carry_over(old_root: &Path, new_root: &Path, key: &str) -> io::Result<()> {
    let src = join_key(old_root, key);
    let dest = join_key(new_root, key);
    if let Some(parent) = dest.parent() {
        create_dir_all_racy(parent)?;
    }

    if fs::symlink_metadata(&src)?.file_type().is_symlink() {
        match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&dest)?,
            Ok(_) => fs::remove_file(&dest)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        return copy_symlink(&src, &dest);
    }

    fs::copy(&src, &dest)?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dest)
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    let resolved = src.parent().map_or_else(|| link.clone(), |p| p.join(&link));
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(link, dest)
    } else {
        std::os::windows::fs::symlink_file(link, dest)
    }
}

#[cfg(not(any(unix, windows)))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest).map(drop)
}

fn parent_dir(root: &Path) -> PathBuf {
    match root.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Write the target manifest as the sidecar on a clean run, clear it otherwise
fn finish_sidecar(version: &Version, root: &Path, failures: &mut Vec<FailureRecord>) {
    let result = if failures.is_empty() {
        version.manifest.write_sidecar(root)
    } else {
        VersionManifest::clear_sidecar(root)
    };
    if let Err(e) = result {
        warn!("cannot update sidecar: {e}");
        failures.push(FailureRecord::new(SIDECAR_FILE, Operation::Promote, e));
    }
}
