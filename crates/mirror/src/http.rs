//! HTTP mirror
//!
//! Versions are discovered by scraping the directory index at the mirror
//! base: every relative link ending in `/` names a version.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, trace};

use upsync_core::{Mirror, Result, SIDECAR_FILE, UpdateError, VersionManifest};

const USER_AGENT: &str = concat!("upsync/", env!("CARGO_PKG_VERSION"));

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("href pattern is valid")
});

/// Mirror reached over HTTP(S)
pub struct HttpMirror {
    base: Url,
    display: String,
    client: Client,
    timeout: Duration,
}

impl HttpMirror {
    /// Create a mirror client.
    ///
    /// `timeout` bounds listing, manifest and file requests; archive
    /// downloads are only bounded by the connect timeout. `pool_limit` caps
    /// idle connections kept per host.
    ///
    /// # Errors
    /// Returns [`UpdateError::Config`] if `base` is not a usable URL
    pub fn new(base: &str, timeout: Duration, pool_limit: usize) -> Result<Self> {
        let url = Url::parse(base).map_err(|e| UpdateError::Config(format!("invalid mirror URL {base:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(UpdateError::Config(format!("mirror URL {base:?} cannot hold paths")));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(pool_limit)
            .build()
            .map_err(|e| UpdateError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base: url,
            display: base.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    /// URL of `segments` below the base, each segment percent-encoded
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL of a file inside a version directory
    fn file_url(&self, version: &str, key: &str) -> Url {
        self.url(std::iter::once(version).chain(key.split('/').filter(|s| !s.is_empty())))
    }

    fn unreachable(&self, err: impl std::fmt::Display) -> UpdateError {
        UpdateError::MirrorUnreachable {
            url: self.display.clone(),
            reason: err.to_string(),
        }
    }

    /// GET with the request timeout; non-2xx statuses come back as `Err`
    async fn get(&self, url: Url, timeout: Option<Duration>) -> std::result::Result<Bytes, Failure> {
        trace!(%url, "GET");
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(Failure::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Failure::Status(status));
        }
        response.bytes().await.map_err(Failure::Transport)
    }
}

/// Why a GET failed
enum Failure {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) if e.is_timeout() => write!(f, "timed out"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

#[async_trait]
impl Mirror for HttpMirror {
    fn base(&self) -> &str {
        &self.display
    }

    async fn list_versions(&self) -> Result<Vec<String>> {
        let url = self.url([""]);
        let body = self
            .get(url, Some(self.timeout))
            .await
            .map_err(|e| self.unreachable(e))?;
        let html = String::from_utf8_lossy(&body);
        let versions = parse_index(&html);
        debug!(count = versions.len(), "parsed directory index");
        Ok(versions)
    }

    async fn fetch_manifest(&self, version: &str) -> Result<VersionManifest> {
        let url = self.url([version, SIDECAR_FILE]);
        let unavailable = |reason: String| UpdateError::VersionUnavailable {
            version: version.to_string(),
            reason,
        };

        let body = match self.get(url, Some(self.timeout)).await {
            Ok(body) => body,
            Err(e @ Failure::Status(_)) => return Err(unavailable(e.to_string())),
            Err(e) => return Err(self.unreachable(e)),
        };
        VersionManifest::from_json(&body).map_err(|e| unavailable(format!("malformed manifest: {e}")))
    }

    async fn fetch_file(&self, version: &str, path: &str) -> Result<Bytes> {
        self.get(self.file_url(version, path), Some(self.timeout))
            .await
            .map_err(|e| UpdateError::DownloadFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_archive(&self, version: &str) -> Result<Bytes> {
        let name = format!("{version}.zip");
        self.get(self.url([name.as_str()]), None)
            .await
            .map_err(|e| UpdateError::DownloadFailed {
                path: name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Extract version names from a directory index page.
///
/// Keeps relative links ending in `/`, dropping parent links, absolute
/// paths, queries and links to other hosts. Names are percent-decoded, since
/// [`HttpMirror`] encodes them again when building URLs. Order is page
/// order, without duplicates.
#[must_use]
pub fn parse_index(html: &str) -> Vec<String> {
    let mut versions: Vec<String> = Vec::new();
    for capture in HREF.captures_iter(html) {
        let href = &capture[1];
        if href.contains("://") || href.starts_with(['/', '?', '#', '.']) {
            continue;
        }
        let Some(encoded) = href.strip_suffix('/') else {
            continue;
        };
        let name = percent_decode_str(encoded).decode_utf8_lossy();
        if name.is_empty() || name.contains('/') {
            continue;
        }
        if !versions.iter().any(|v| *v == name) {
            versions.push(name.into_owned());
        }
    }
    versions
}
