//! Configuration file and environment overrides

use catscan_api::{ClientConfig, RateLimiter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Name of the configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = ".catscan_config.json";

/// Database file inside the data directory
pub const DATABASE_FILE_NAME: &str = "history.db";

pub const ENV_API_URL: &str = "CATSCAN_API_URL";
pub const ENV_ORG: &str = "CATSCAN_ORG";
pub const ENV_DEBUG: &str = "CATSCAN_DEBUG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error for {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("JSON parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// User configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatscanConfig {
    pub api_url: String,
    /// Organization scanned when none is given on the command line
    pub organization: Option<String>,
    /// Workspaces walked at once
    pub concurrency: usize,
    /// Token bucket size
    pub rate_capacity: u32,
    /// Token bucket refill rate
    pub rate_per_second: f64,
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub page_size: u32,
    /// Where the history database lives
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl Default for CatscanConfig {
    fn default() -> Self {
        Self {
            api_url: catscan_api::client::DEFAULT_BASE_URL.to_string(),
            organization: None,
            concurrency: 4,
            rate_capacity: 30,
            rate_per_second: 30.0,
            max_in_flight: 10,
            max_attempts: 5,
            request_timeout_secs: 30,
            page_size: 100,
            data_dir: default_data_dir(),
            debug: false,
        }
    }
}

/// `~/.catscan`, or `.catscan` when there is no home directory
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".catscan"), |home| home.join(".catscan"))
}

impl CatscanConfig {
    /// Load configuration
    ///
    /// With an explicit `path` the file must exist. Otherwise
    /// [`CONFIG_FILE_NAME`] in the working directory is used if present.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    debug!("no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying overrides
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `CATSCAN_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(org) = lookup(ENV_ORG).filter(|v| !v.trim().is_empty()) {
            self.organization = Some(org);
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.debug = is_truthy(&debug);
        }
    }

    /// Reject settings the client or limiter cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url must not be empty".into()));
        }
        if self.rate_capacity == 0 {
            return Err(ConfigError::Invalid("rate_capacity must be at least 1".into()));
        }
        if !(self.rate_per_second.is_finite() && self.rate_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "rate_per_second must be a positive number".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > 100 {
            return Err(ConfigError::Invalid("page_size must be between 1 and 100".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_url.clone(),
            max_in_flight: self.max_in_flight,
            max_attempts: self.max_attempts,
            timeout: Duration::from_secs(self.request_timeout_secs),
            page_size: self.page_size,
            ..ClientConfig::default()
        }
    }

    pub fn rate_limiter(&self) -> ConfigResult<RateLimiter> {
        RateLimiter::new(self.rate_capacity, self.rate_per_second)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CatscanConfig::default();
        assert_eq!(config.api_url, "https://app.terraform.io/api/v2");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.rate_capacity, 30);
        assert!(config.database_path().ends_with(".catscan/history.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"organization": "acme", "concurrency": 8}"#).unwrap();

        let config = CatscanConfig::from_file(&path).unwrap();
        assert_eq!(config.organization.as_deref(), Some("acme"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            CatscanConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = CatscanConfig::load(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "https://tfe.example.com/api/v2"),
            (ENV_ORG, "platform"),
            (ENV_DEBUG, "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = CatscanConfig::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.api_url, "https://tfe.example.com/api/v2");
        assert_eq!(config.organization.as_deref(), Some("platform"));
        assert!(config.debug);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = CatscanConfig {
            rate_per_second: 0.0,
            ..CatscanConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_converts_to_client_settings() {
        let config = CatscanConfig {
            max_attempts: 2,
            page_size: 20,
            request_timeout_secs: 5,
            ..CatscanConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.max_attempts, 2);
        assert_eq!(client.page_size, 20);
        assert_eq!(client.timeout, Duration::from_secs(5));

        let limiter = config.rate_limiter().unwrap();
        assert_eq!(limiter.capacity(), 30);
    }
}
