// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for a [`DownloadManager`](crate::manager::DownloadManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Base directory that relative destinations are resolved against.
    pub download_root: PathBuf,
    /// Appended to the resolved destination to name the temporary file.
    pub temp_suffix: String,
    /// Panic on misuse (double initialise, unknown listener, calls before
    /// initialise) instead of only returning the error. On in debug builds.
    pub strict_contracts: bool,
    pub http: HttpConfig,
    pub log: LogConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("."),
            temp_suffix: default_temp_suffix(),
            strict_contracts: cfg!(debug_assertions),
            http: HttpConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_temp_suffix() -> String {
    ".odm-part".to_string()
}

/// Settings for the built-in HTTP executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; 0 disables it, which suits large files.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("odm-queue/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 30,
            request_timeout_secs: 0,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl ManagerConfig {
    pub fn with_root(download_root: impl Into<PathBuf>) -> Self {
        Self {
            download_root: download_root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load the file if it exists and parses, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "using default config");
                Self::default()
            }
        }
    }

    /// Map a relative destination to its location under the download root.
    ///
    /// Absolute paths and paths that climb out of the root are refused.
    pub fn resolve(&self, destination: &Path) -> Option<PathBuf> {
        if destination.as_os_str().is_empty() {
            return None;
        }
        for component in destination.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(self.download_root.join(destination))
    }
}
