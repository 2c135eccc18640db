//! upsync-core: Core update engine
//!
//! Provides tree hashing, manifest diffing, ignore resolution, concurrent
//! fetching into a staging area and reconciled installs against a mirror.

pub mod config;
pub mod diff;
pub mod error;
pub mod exclude;
pub mod fetch;
pub mod hash;
pub mod install;
pub mod manifest;
pub mod mirror;
pub mod scan;
pub mod staging;
pub mod updater;

pub use config::UpdaterConfig;
pub use diff::Diff;
pub use error::{FailureRecord, Operation, Result, UpdateError};
pub use exclude::IgnoreMatcher;
pub use fetch::{FetchCoordinator, FetchOutcome, FetchProgress, FetchReport};
pub use hash::ContentHash;
pub use install::{InstallExecutor, InstallPolicy, InstallTarget, TargetState};
pub use manifest::{FileManifest, SIDECAR_FILE, Version, VersionManifest};
pub use mirror::Mirror;
pub use scan::Scanner;
pub use staging::StagingArea;
pub use updater::{InstallPlan, InstallReport, LocalSource, Updater};
