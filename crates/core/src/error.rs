//! Error types for update operations.
//!
//! Structural failures (no mirror, no such version, unwritable target) are
//! returned as [`UpdateError`]. Per-file failures inside a batch never abort
//! the batch; they are collected as [`FailureRecord`]s instead.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an update operation as a whole.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Listing or manifest endpoint could not be reached.
    #[error("mirror unreachable at {url}: {reason}")]
    MirrorUnreachable {
        /// Mirror URL that was contacted
        url: String,
        /// Transport-level reason
        reason: String,
    },

    /// A version's manifest is missing or malformed.
    #[error("version {version} unavailable: {reason}")]
    VersionUnavailable {
        /// Version identifier
        version: String,
        /// Why the manifest could not be used
        reason: String,
    },

    /// The requested version is not published on the mirror.
    #[error("version {0} not found on mirror")]
    VersionNotFound(String),

    /// A single file could not be downloaded.
    #[error("download of {path} failed: {reason}")]
    DownloadFailed {
        /// Relative path of the file
        path: String,
        /// Transport or I/O reason
        reason: String,
    },

    /// A single file could not be deleted.
    #[error("delete of {path} failed: {reason}")]
    DeleteFailed {
        /// Relative path of the file
        path: String,
        /// I/O reason
        reason: String,
    },

    /// The install root cannot be created or written.
    #[error("install target {} unreachable: {reason}", path.display())]
    TargetUnreachable {
        /// Install root
        path: PathBuf,
        /// I/O reason
        reason: String,
    },

    /// The bulk archive could not be read or extracted.
    #[error("archive error: {0}")]
    Archive(String),

    /// Configuration is invalid or unreadable.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error outside of a per-file batch.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Build a [`UpdateError::TargetUnreachable`] from an I/O error.
    pub fn target(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::TargetUnreachable {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Operation that was being attempted when a per-file failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Fetching a file from the mirror into staging
    Download,
    /// Removing an obsolete file from the live tree
    Delete,
    /// Copying a staged or preserved file into the live tree
    Promote,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Download => "download",
            Self::Delete => "delete",
            Self::Promote => "promote",
        };
        f.write_str(s)
    }
}

/// A per-file failure recorded during a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Relative path of the file
    pub path: String,
    /// What was being attempted
    pub operation: Operation,
    /// Human-readable reason
    pub reason: String,
}

impl FailureRecord {
    /// Create a new failure record.
    pub fn new(path: impl Into<String>, operation: Operation, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            operation,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.path, self.reason)
    }
}

impl FailureRecord {
    /// Record a per-file error under `path`.
    ///
    /// `DownloadFailed` and `DeleteFailed` already name the file, so only
    /// their reason is kept.
    pub fn from_error(path: impl Into<String>, operation: Operation, err: UpdateError) -> Self {
        let reason = match err {
            UpdateError::DownloadFailed { reason, .. } | UpdateError::DeleteFailed { reason, .. } => reason,
            other => other.to_string(),
        };
        Self::new(path, operation, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mirror_unreachable() {
        let err = UpdateError::MirrorUnreachable {
            url: "https://mirror.example".to_string(),
            reason: "timed out".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://mirror.example"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_display_target_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = UpdateError::target("/opt/app", &io);
        assert!(err.to_string().contains("/opt/app"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_failure_record_display() {
        let record = FailureRecord::new("bin/app", Operation::Delete, "busy");
        assert_eq!(record.to_string(), "delete bin/app: busy");
    }

    #[test]
    fn test_failure_record_from_error() {
        let err = UpdateError::DeleteFailed {
            path: "b.txt".to_string(),
            reason: "busy".to_string(),
        };
        let record = FailureRecord::from_error("b.txt", Operation::Delete, err);
        assert_eq!(record.to_string(), "delete b.txt: busy");

        let io = std::io::Error::other("disk full");
        let record = FailureRecord::from_error("a.txt", Operation::Download, io.into());
        assert_eq!(record.reason, "I/O error: disk full");
    }
}
