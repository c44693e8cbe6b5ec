// src/config.rs

//! Watch configuration loading.
//!
//! The config file is owned by an external editor; the scheduler treats it as
//! read-only and re-reads it through a [`ConfigProvider`] on a fixed cadence,
//! keeping the last-known-good document when a re-read fails.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{NightStop, Target};

/// Root watch configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WatchConfig {
    /// Shared HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Quiet window settings
    #[serde(default)]
    pub night_stop: NightStop,

    /// Monitored targets
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::config("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::config("http.timeout_secs must be > 0"));
        }
        if self.night_stop.start_hour > 23 || self.night_stop.end_hour > 24 {
            return Err(AppError::config("night_stop hours out of range"));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(AppError::config("target with empty name"));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(AppError::config(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
        }
        Ok(())
    }
}

/// Shared HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Default request timeout in seconds; per-target fetches override this
    /// with the target's own interval
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

mod defaults {
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; lookout/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
}

/// Read-only seam to the external config owner.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<WatchConfig>;
}

/// Provider backed by a TOML file on disk.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self) -> Result<WatchConfig> {
        let config = WatchConfig::load(&self.path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [http]
        user_agent = "lookout-test"

        [night_stop]
        enabled = true
        start_hour = 1
        end_hour = 5

        [[targets]]
        name = "docs"
        kind = "generic"
        url = "https://example.com/docs"

        [[targets]]
        name = "train-lines"
        kind = "status_feed"
        url = "https://transit.example.com/diainfo"
        interval_seconds = 180
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config: WatchConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.http.user_agent, "lookout-test");
        assert!(config.night_stop.enabled);
        assert_eq!(config.targets.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: WatchConfig = toml::from_str("").unwrap();
        assert!(config.targets.is_empty());
        assert!(!config.night_stop.enabled);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config: WatchConfig = toml::from_str(SAMPLE).unwrap();
        let mut dup = config.targets[0].clone();
        dup.name = "docs".to_string();
        config.targets.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_hours() {
        let mut config: WatchConfig = toml::from_str(SAMPLE).unwrap();
        config.night_stop.end_hour = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_provider_surfaces_missing_file() {
        let provider = FileConfigProvider::new("/nonexistent/watch.toml");
        assert!(provider.load().is_err());
    }
}
