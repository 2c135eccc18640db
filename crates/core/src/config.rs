//! Updater configuration file parsing (upsync.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::fetch::DEFAULT_CONCURRENCY;

/// Default config file name
pub const CONFIG_FILE: &str = "upsync.toml";

/// Updater configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Mirror base URL; versions live at `{mirror}/{version}/`
    pub mirror: String,

    /// Ignore patterns, anchored at the install root
    pub ignores: Vec<String>,

    /// Concurrent downloads (and idle HTTP connections kept per host)
    pub pool_limit: usize,

    /// `new` file count at which a full reinstall replaces the incremental path
    pub new_install_threshold: usize,

    /// Installation root
    pub install_dir: PathBuf,

    /// Staging root; one subdirectory per version
    pub staging_dir: Option<PathBuf>,

    /// Use the `version.json` sidecar instead of rehashing when present
    pub trust_sidecar: bool,

    /// Per-request timeout for mirror calls
    pub timeout_secs: u64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            mirror: "https://mower.zhaozuohong.vip".to_string(),
            ignores: [
                "*.yml",
                "*.json",
                "tmp/*",
                "log/*",
                "screenshot/**/*",
                "adb-buildin/*",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            pool_limit: DEFAULT_CONCURRENCY,
            new_install_threshold: 1000,
            install_dir: PathBuf::new(),
            staging_dir: None,
            trust_sidecar: true,
            timeout_secs: 30,
        }
    }
}

impl UpdaterConfig {
    /// Load config from a file.
    ///
    /// Returns the default config if the file doesn't exist. Keys missing
    /// from the file keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting config is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| UpdateError::Config(format!("{}: {e}", path.display())))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Write config back to a file
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns an error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.mirror.trim().is_empty() {
            return Err(UpdateError::Config("mirror must not be empty".to_string()));
        }
        if self.pool_limit == 0 {
            return Err(UpdateError::Config("pool_limit must be at least 1".to_string()));
        }
        if self.new_install_threshold == 0 {
            return Err(UpdateError::Config(
                "new_install_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Staging root, falling back to `<temp>/upsync`
    #[must_use]
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("upsync"))
    }

    /// Mirror request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
