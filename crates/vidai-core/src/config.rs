//! Engine configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for an inference engine context.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// model_dir = "/var/lib/vidai/models"
/// allow_downloads = false
/// cache_fraction = 0.05
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local directory holding model artifacts.
    pub model_dir: PathBuf,
    /// Directory with `*.json` model descriptors (defaults to `model_dir`).
    pub config_dir: Option<PathBuf>,
    /// Local mirror that missing or corrupt artifacts are re-fetched from.
    pub mirror_dir: Option<PathBuf>,
    pub allow_downloads: bool,
    /// Share of system RAM the model buffer cache may hold (0, 1].
    pub cache_fraction: f32,
    pub download_attempts: u32,
    /// Drain polling interval for multithreaded sinks.
    pub sink_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            config_dir: None,
            mirror_dir: None,
            allow_downloads: true,
            cache_fraction: 0.1,
            download_attempts: 3,
            sink_poll_interval_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cache_fraction > 0.0 && self.cache_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "cache_fraction {} out of range (0-1]",
                self.cache_fraction
            )));
        }
        if self.download_attempts == 0 {
            return Err(Error::InvalidConfig(
                "download_attempts must be at least 1".to_string(),
            ));
        }
        if self.sink_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sink_poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        self.config_dir.as_deref().unwrap_or(&self.model_dir)
    }

    pub fn sink_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sink_poll_interval_ms)
    }
}
