//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vivarium_core::{CoreOptions, HashPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub firmware: FirmwareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or `:memory:`
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "vivarium.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Firmware archive URL (fetching is disabled when unset)
    #[serde(default)]
    pub url: Option<String>,
    /// Hours between archive fetches
    #[serde(default = "default_fetch_interval_hours")]
    pub fetch_interval_hours: u64,
    /// Timeout for one archive download in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Whether image bytes are checked against the filename hash
    #[serde(default)]
    pub hash_policy: HashPolicy,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            url: None,
            fetch_interval_hours: default_fetch_interval_hours(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            hash_policy: HashPolicy::default(),
        }
    }
}

fn default_fetch_interval_hours() -> u64 {
    3
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

impl FirmwareConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_hours.max(1) * 3600)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Config {
    /// Options handed to the core
    pub fn core_options(&self) -> CoreOptions {
        CoreOptions {
            hash_policy: self.firmware.hash_policy,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.bind, "0.0.0.0:5000");
        assert_eq!(config.database.path, "vivarium.db");
        assert!(config.firmware.url.is_none());
        assert_eq!(config.firmware.fetch_interval(), Duration::from_secs(3 * 3600));
        assert_eq!(config.firmware.hash_policy, HashPolicy::Verify);
    }

    #[test]
    fn test_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vivarium.toml");
        std::fs::write(
            &path,
            r#"
[database]
path = "/var/lib/vivarium/stats.db"

[firmware]
url = "https://firmware.example.com/latest.zip"
hash_policy = "trust_filename"
fetch_timeout_secs = 15
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.daemon.bind, "0.0.0.0:5000");
        assert_eq!(config.database.path, "/var/lib/vivarium/stats.db");
        assert_eq!(
            config.firmware.url.as_deref(),
            Some("https://firmware.example.com/latest.zip")
        );
        assert_eq!(config.firmware.fetch_timeout(), Duration::from_secs(15));
        assert_eq!(config.core_options().hash_policy, HashPolicy::TrustFilename);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vivarium.toml");
        std::fs::write(&path, "[firmware]\nhash_policy = \"sometimes\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
