//! Mirror abstraction: where versions, manifests and files come from
//!
//! Implementations bind a base location at construction; every call is
//! relative to it. No call retries: transport-level retransmission is the
//! implementation's business, and anything beyond that is the caller's.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::manifest::VersionManifest;

/// Read-only access to a published mirror
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Base location, for logs and error messages
    fn base(&self) -> &str;

    /// List version identifiers in mirror order.
    ///
    /// Serves as the connectivity check; fails with
    /// [`MirrorUnreachable`](crate::UpdateError::MirrorUnreachable).
    async fn list_versions(&self) -> Result<Vec<String>>;

    /// Fetch `{base}/{version}/version.json`.
    ///
    /// Fails with [`VersionUnavailable`](crate::UpdateError::VersionUnavailable)
    /// when the document is missing or malformed.
    async fn fetch_manifest(&self, version: &str) -> Result<VersionManifest>;

    /// Fetch `{base}/{version}/{path}`.
    ///
    /// Fails with [`DownloadFailed`](crate::UpdateError::DownloadFailed).
    async fn fetch_file(&self, version: &str, path: &str) -> Result<Bytes>;

    /// Fetch the bulk archive `{base}/{version}.zip`.
    async fn fetch_archive(&self, version: &str) -> Result<Bytes>;
}
