//! Configuration module for cloudmirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for cloudmirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub transfers: TransfersConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local mirror.
    pub root: PathBuf,
    /// Maximum number of changes sent in one SyncTo request.
    pub max_sync_to_batch: usize,
    /// Seconds between failure queue retry attempts.
    pub retry_interval_secs: u64,
    /// Staging directory for in-flight downloads.
    pub temp_download_dir: PathBuf,
}

/// Remote service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the sync service, e.g. `https://sync.example.com/api`.
    pub base_url: String,
    /// Timeout applied to every request, in seconds.
    pub request_timeout_secs: u64,
    /// Bearer token. `None` sends unauthenticated requests.
    pub access_token: Option<String>,
}

/// Background transfer pool sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    pub upload_concurrent: usize,
    pub download_concurrent: usize,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudmirror")
            .join("config.yaml")
    }
}

impl SyncConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("CloudMirror"),
            max_sync_to_batch: 100,
            retry_interval_secs: 10,
            temp_download_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("cloudmirror")
                .join("downloads"),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 180,
            access_token: None,
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            upload_concurrent: 4,
            download_concurrent: 8,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_sync_to_batch"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn must_be_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        must_be_positive(
            &mut errors,
            "sync.max_sync_to_batch",
            self.sync.max_sync_to_batch as u64,
        );
        must_be_positive(
            &mut errors,
            "sync.retry_interval_secs",
            self.sync.retry_interval_secs,
        );
        if self.sync.root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: "must not be empty".into(),
            });
        }

        // --- remote ---
        if self.remote.base_url.trim().is_empty() {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: "must not be empty".into(),
            });
        }
        must_be_positive(
            &mut errors,
            "remote.request_timeout_secs",
            self.remote.request_timeout_secs,
        );

        // --- transfers ---
        must_be_positive(
            &mut errors,
            "transfers.upload_concurrent",
            self.transfers.upload_concurrent as u64,
        );
        must_be_positive(
            &mut errors,
            "transfers.download_concurrent",
            self.transfers.download_concurrent as u64,
        );

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use cloudmirror_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/CloudMirror"))
///     .remote_base_url("https://sync.example.com/api")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_max_sync_to_batch(mut self, max: usize) -> Self {
        self.config.sync.max_sync_to_batch = max;
        self
    }

    pub fn sync_retry_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.retry_interval_secs = seconds;
        self
    }

    pub fn sync_temp_download_dir(mut self, dir: PathBuf) -> Self {
        self.config.sync.temp_download_dir = dir;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.request_timeout_secs = seconds;
        self
    }

    pub fn remote_access_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote.access_token = Some(token.into());
        self
    }

    // --- transfers ---

    pub fn transfers_upload_concurrent(mut self, n: usize) -> Self {
        self.config.transfers.upload_concurrent = n;
        self
    }

    pub fn transfers_download_concurrent(mut self, n: usize) -> Self {
        self.config.transfers.download_concurrent = n;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
