//! Application configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use postsync_common::{Error, Result};
use postsync_remote::http::DEFAULT_BASE_URL;

/// Connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Host the probe connects to.
    pub host: String,
    /// TCP port on `host`.
    pub port: u16,
    /// Seconds between probes.
    pub interval_secs: u64,
    /// Connect timeout per probe, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "jsonplaceholder.typicode.com".to_string(),
            port: 443,
            interval_secs: 5,
            timeout_ms: 1500,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration, stored as JSON.
///
/// Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the remote REST backend.
    pub api_base_url: String,
    /// SQLite database holding posts and the pending queue.
    pub database_path: PathBuf,
    /// HTTP client timeout in seconds.
    pub request_timeout_secs: u64,
    /// Connectivity probe.
    pub probe: ProbeConfig,
    /// Skip the probe and stay disconnected.
    pub offline: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            database_path: default_data_dir().join("postsync.db"),
            request_timeout_secs: 30,
            probe: ProbeConfig::default(),
            offline: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("postsync"))
        .unwrap_or_else(|| PathBuf::from(".postsync"))
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("postsync").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("postsync.json"))
}

impl AppConfig {
    /// Load configuration from `path`.
    ///
    /// # Returns
    /// Defaults if the file does not exist.
    ///
    /// # Errors
    /// - `Config` if the file is malformed or fails validation
    /// - `Io` if the file exists but cannot be read
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("api_base_url: {}", e)))?;
        if self.probe.interval_secs == 0 {
            return Err(Error::Config("probe.interval_secs must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
