//! upsync-mirror: Mirror implementations
//!
//! An HTTP mirror serving a directory index, and a local-filesystem mirror
//! with the same layout for testing and offline installs.

pub mod http;
pub mod local;

use std::sync::Arc;

use upsync_core::{Mirror, Result, UpdaterConfig};

pub use http::HttpMirror;
pub use local::LocalMirror;

/// Open the mirror at `location`.
///
/// `http://` and `https://` URLs give an [`HttpMirror`]; `file://` URLs and
/// plain paths give a [`LocalMirror`].
///
/// # Errors
/// Returns an error if the URL is invalid or the HTTP client cannot be built
pub fn open(location: &str, config: &UpdaterConfig) -> Result<Arc<dyn Mirror>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpMirror::new(location, config.timeout(), config.pool_limit)?))
    } else {
        let path = location.strip_prefix("file://").unwrap_or(location);
        Ok(Arc::new(LocalMirror::new(path)))
    }
}
