//! Update session: version discovery, planning and reconciled installs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::UpdaterConfig;
use crate::diff::Diff;
use crate::error::{FailureRecord, Result, UpdateError};
use crate::fetch::{FetchCoordinator, FetchProgress, FetchReport};
use crate::install::{InstallExecutor, InstallPolicy, InstallTarget, TargetState};
use crate::manifest::{FileManifest, Version, VersionManifest};
use crate::mirror::Mirror;
use crate::scan::Scanner;
use crate::staging::StagingArea;

/// Where the local manifest of a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSource {
    /// Target absent or empty
    Absent,
    /// `version.json` left by the last clean install
    Sidecar,
    /// Hashed from disk
    Scanned,
}

impl std::fmt::Display for LocalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Sidecar => write!(f, "sidecar"),
            Self::Scanned => write!(f, "scanned"),
        }
    }
}

/// What an install would do, computed without touching the target
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Version being installed
    pub version: Version,
    /// State of the target when planned
    pub state: TargetState,
    /// Origin of the local manifest
    pub source: LocalSource,
    /// Changes to apply
    pub diff: Diff,
    /// Chosen strategy
    pub policy: InstallPolicy,
}

/// Outcome of [`Updater::install`]
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Version installed
    pub version: String,
    /// Strategy used
    pub policy: InstallPolicy,
    /// Diff that was applied
    pub diff: Diff,
    /// Download statistics (empty for a full reinstall)
    pub fetch: FetchReport,
    /// Every per-file failure, downloads first
    pub failures: Vec<FailureRecord>,
}

impl InstallReport {
    /// Whether the target now matches the version exactly
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One update session against a mirror.
///
/// Version manifests are cached for the lifetime of the session, so
/// planning and installing the same version fetches its manifest once.
pub struct Updater<M: ?Sized> {
    mirror: Arc<M>,
    config: UpdaterConfig,
    listing: Option<Vec<String>>,
    cache: BTreeMap<String, Version>,
}

impl<M: Mirror + ?Sized + 'static> Updater<M> {
    /// Create a session
    #[must_use]
    pub fn new(mirror: Arc<M>, config: UpdaterConfig) -> Self {
        Self {
            mirror,
            config,
            listing: None,
            cache: BTreeMap::new(),
        }
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Mirror in use
    #[must_use]
    pub fn mirror(&self) -> &Arc<M> {
        &self.mirror
    }

    /// Drop every cached listing and manifest
    pub fn refresh(&mut self) {
        self.listing = None;
        self.cache.clear();
    }

    /// List every published version with its manifest, in mirror order.
    ///
    /// Versions whose manifest cannot be fetched are skipped with a warning.
    ///
    /// # Errors
    /// Fails if the mirror is unreachable
    pub async fn fetch_versions(&mut self) -> Result<Vec<Version>> {
        let names = self.mirror.list_versions().await?;
        debug!(mirror = self.mirror.base(), count = names.len(), "listed versions");

        let mut versions = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(cached) = self.cache.get(name) {
                versions.push(cached.clone());
                continue;
            }
            match self.mirror.fetch_manifest(name).await {
                Ok(manifest) => {
                    let version = Version::new(name.as_str(), manifest);
                    self.cache.insert(name.clone(), version.clone());
                    versions.push(version);
                }
                Err(UpdateError::VersionUnavailable { version, reason }) => {
                    warn!(version = %version, "skipping version: {reason}");
                }
                Err(e) => return Err(e),
            }
        }

        self.listing = Some(names);
        Ok(versions)
    }

    /// Look up one version, consulting the session cache first.
    ///
    /// # Errors
    /// [`UpdateError::VersionNotFound`] if the mirror does not list it,
    /// [`UpdateError::VersionUnavailable`] if its manifest is unusable
    pub async fn version(&mut self, name: &str) -> Result<Version> {
        if let Some(version) = self.cache.get(name) {
            return Ok(version.clone());
        }

        if self.listing.is_none() {
            self.listing = Some(self.mirror.list_versions().await?);
        }
        if !self
            .listing
            .as_ref()
            .is_some_and(|names| names.iter().any(|n| n == name))
        {
            return Err(UpdateError::VersionNotFound(name.to_string()));
        }

        let version = Version::new(name, self.mirror.fetch_manifest(name).await?);
        self.cache.insert(name.to_string(), version.clone());
        Ok(version)
    }

    /// Manifest of what is currently installed under `target`.
    ///
    /// Uses the sidecar when `trust_sidecar` is set and one is present;
    /// otherwise hashes the tree.
    ///
    /// # Errors
    /// Fails if the target cannot be read
    pub fn local_manifest(&self, target: &InstallTarget) -> Result<(FileManifest, LocalSource)> {
        if self.config.trust_sidecar {
            if let Some(sidecar) = VersionManifest::read_sidecar(&target.root) {
                debug!(root = %target.root.display(), "using sidecar manifest");
                return Ok((sidecar.hash, LocalSource::Sidecar));
            }
        }
        let manifest = Scanner::new(&target.root).scan()?;
        Ok((manifest, LocalSource::Scanned))
    }

    /// Compute what installing `name` into `target` would do.
    ///
    /// Nothing on disk is modified.
    ///
    /// # Errors
    /// Fails on mirror errors, an unknown version, or an unreadable target
    pub async fn plan(&mut self, name: &str, target: &InstallTarget) -> Result<InstallPlan> {
        let version = self.version(name).await?;
        let state = target.state()?;

        let (diff, source) = match state {
            TargetState::Missing | TargetState::Empty => (Diff::fresh(version.files()), LocalSource::Absent),
            TargetState::Populated => {
                let ignored = target.ignored()?;
                let (local, source) = self.local_manifest(target)?;
                (Diff::compute(&local, version.files(), &ignored), source)
            }
        };

        let policy = self.executor().policy(state, &diff);
        debug!(
            version = %version.name,
            ?state,
            %source,
            new = diff.new.len(),
            replace = diff.replace.len(),
            remove = diff.remove.len(),
            ignored = diff.ignored.len(),
            %policy,
            "planned install"
        );

        Ok(InstallPlan {
            version,
            state,
            source,
            diff,
            policy,
        })
    }

    /// Bring `target` to exactly the content of version `name`.
    ///
    /// Equivalent to [`Self::plan`] followed by [`Self::apply`].
    ///
    /// # Errors
    /// See [`Self::plan`] and [`Self::apply`]
    pub async fn install<F>(&mut self, name: &str, target: &InstallTarget, on_progress: F) -> Result<InstallReport>
    where
        F: FnMut(FetchProgress<'_>),
    {
        let plan = self.plan(name, target).await?;
        self.apply(plan, target, on_progress).await
    }

    /// Carry out a plan made by [`Self::plan`] for the same `target`.
    ///
    /// Mirror failures abort before the target is touched. After that,
    /// per-file problems are collected in the report and the run continues;
    /// rerunning retries only what is still missing.
    ///
    /// # Errors
    /// Fails on mirror connectivity, a version no longer listed, an
    /// unreachable target, or a failed full reinstall
    pub async fn apply<F>(&mut self, plan: InstallPlan, target: &InstallTarget, on_progress: F) -> Result<InstallReport>
    where
        F: FnMut(FetchProgress<'_>),
    {
        let name = plan.version.name.as_str();

        // Connectivity is checked on every install, even with a warm cache
        let names = self.mirror.list_versions().await?;
        if !names.iter().any(|n| n == name) {
            return Err(UpdateError::VersionNotFound(name.to_string()));
        }
        self.listing = Some(names);

        let staging = StagingArea::new(&self.config.staging_root(), name);
        let fetch = match plan.policy {
            InstallPolicy::Incremental => {
                FetchCoordinator::new(Arc::clone(&self.mirror), self.config.pool_limit)
                    .fetch_all(name, &plan.diff, &staging, on_progress)
                    .await
            }
            InstallPolicy::FullReinstall => FetchReport::default(),
        };

        let failures = self
            .executor()
            .execute(
                plan.policy,
                &plan.version,
                target,
                &plan.diff,
                &staging,
                fetch.failures.clone(),
            )
            .await?;

        if failures.is_empty() {
            info!(version = name, "install complete");
        } else {
            warn!(version = name, failures = failures.len(), "install finished with failures");
        }

        Ok(InstallReport {
            version: name.to_string(),
            policy: plan.policy,
            diff: plan.diff,
            fetch,
            failures,
        })
    }

    fn executor(&self) -> InstallExecutor<M> {
        InstallExecutor::new(Arc::clone(&self.mirror), self.config.new_install_threshold)
    }
}
