//! Configuration loading and types for blobfs.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The storage section selects a driver and carries
//! the Azure container settings; credentials missing from the file are
//! resolved from the environment.

use serde::Deserialize;
use std::path::Path;

use crate::errors::{FsError, FsResult};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage driver settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Storage driver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Registered driver name: `azure` or `memory`.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Azure Blob Storage settings.
    #[serde(default)]
    pub azure: Option<AzureConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            azure: None,
        }
    }
}

/// Azure Blob Storage container configuration.
#[derive(Clone, Deserialize)]
pub struct AzureConfig {
    /// Storage account name.
    pub account: String,
    /// Base64-encoded account key. Falls back to the environment when empty.
    #[serde(default)]
    pub key: String,
    /// Container holding every object of this filesystem.
    pub container: String,
    /// Blob service endpoint. Defaults to `https://{account}.blob.core.windows.net`.
    #[serde(default)]
    pub endpoint: String,
    /// Path prefix inside the container.
    #[serde(default)]
    pub prefix: String,
    /// Base URL used by `get_url` instead of the service endpoint.
    #[serde(default)]
    pub public_url: String,
    /// Value sent in `x-ms-version` and signed into SAS tokens.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Delay between copy status checks.
    #[serde(default = "default_copy_poll_interval_ms")]
    pub copy_poll_interval_ms: u64,
    /// Number of copy status checks before giving up.
    #[serde(default = "default_copy_poll_attempts")]
    pub copy_poll_attempts: u32,
    /// Stop a listing silently on the first failing page instead of
    /// returning the error.
    #[serde(default)]
    pub truncate_listing_on_error: bool,
    /// Per-request timeout for the HTTP client.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .field("container", &self.container)
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .field("public_url", &self.public_url)
            .field("api_version", &self.api_version)
            .field("copy_poll_interval_ms", &self.copy_poll_interval_ms)
            .field("copy_poll_attempts", &self.copy_poll_attempts)
            .field("truncate_listing_on_error", &self.truncate_listing_on_error)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

impl AzureConfig {
    /// Build a configuration with defaults for everything but the identity.
    pub fn new(
        account: impl Into<String>,
        key: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
            container: container.into(),
            endpoint: String::new(),
            prefix: String::new(),
            public_url: String::new(),
            api_version: default_api_version(),
            copy_poll_interval_ms: default_copy_poll_interval_ms(),
            copy_poll_attempts: default_copy_poll_attempts(),
            truncate_listing_on_error: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Endpoint without a trailing slash.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://{}.blob.core.windows.net", self.account)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }

    /// Fill the account key (and endpoint) from the environment when the
    /// file did not provide them.
    ///
    /// Resolution order:
    ///   - `AZURE_STORAGE_KEY`
    ///   - `AccountKey=` in `AZURE_STORAGE_CONNECTION_STRING`
    pub fn resolve_from_env(mut self) -> FsResult<Self> {
        if !self.key.is_empty() {
            return Ok(self);
        }

        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            self.key = key;
            return Ok(self);
        }

        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            self.apply_connection_string(&conn_str);
            if !self.key.is_empty() {
                return Ok(self);
            }
        }

        Err(FsError::InvalidCredentials {
            message: format!(
                "no account key for '{}'. Set storage.azure.key, AZURE_STORAGE_KEY, \
                 or AZURE_STORAGE_CONNECTION_STRING.",
                self.account
            ),
        })
    }

    /// Apply `AccountName`, `AccountKey` and `BlobEndpoint` from a
    /// connection string. Values already set in the file take precedence.
    pub fn apply_connection_string(&mut self, conn_str: &str) {
        for part in conn_str.split(';') {
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            match name.trim() {
                "AccountName" if self.account.is_empty() => self.account = value.to_string(),
                "AccountKey" if self.key.is_empty() => self.key = value.to_string(),
                "BlobEndpoint" if self.endpoint.is_empty() => self.endpoint = value.to_string(),
                _ => {}
            }
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_driver() -> String {
    "azure".to_string()
}

fn default_api_version() -> String {
    "2021-08-06".to_string()
}

fn default_copy_poll_interval_ms() -> u64 {
    500
}

fn default_copy_poll_attempts() -> u32 {
    20
}

fn default_request_timeout_secs() -> u64 {
    300
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
