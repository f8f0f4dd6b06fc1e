//! Exporter configuration.
//!
//! Values are layered the usual way: defaults, then an optional YAML file,
//! then CLI/environment overrides applied by `main`. Validation runs once
//! after all layers are merged.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default address for the web interface and telemetry.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9177";

/// Default path under which metrics are exposed.
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// Default offset subtracted from the caller-declared scrape timeout.
pub const DEFAULT_TIMEOUT_OFFSET: Duration = Duration::from_millis(250);

/// Default timeout for opening the per-cycle connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum lifetime of a connection before it is discarded.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(60);

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_max_lifetime() -> Duration {
    DEFAULT_MAX_LIFETIME
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A configuration value is invalid.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Address to listen on for web interface and telemetry.
    pub listen_address: String,

    /// Path under which to expose metrics.
    pub telemetry_path: String,

    /// Offset subtracted from the caller-declared scrape timeout, so the
    /// exporter finishes before the caller gives up on it.
    #[serde(with = "humantime_serde")]
    pub timeout_offset: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            timeout_offset: DEFAULT_TIMEOUT_OFFSET,
        }
    }
}

/// Monitored server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection DSN for the monitored server.
    #[serde(default)]
    pub dsn: String,

    /// Name of the monitored database, interpolated into per-database queries.
    #[serde(default = "default_database")]
    pub database: String,

    /// Timeout for opening the per-cycle connection.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum lifetime of a connection before it is discarded.
    #[serde(default = "default_max_lifetime", with = "humantime_serde")]
    pub max_lifetime: Duration,
}

fn default_database() -> String {
    "demodb".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            database: default_database(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
        }
    }
}

/// Per-scraper default enable flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapersConfig {
    /// Enable the broker status scraper by default.
    pub broker_status: bool,
    /// Enable the spacedb scraper by default.
    pub spacedb: bool,
    /// Enable the statdump scraper by default.
    pub statdump: bool,
}

impl Default for ScrapersConfig {
    fn default() -> Self {
        Self {
            broker_status: true,
            spacedb: true,
            statdump: true,
        }
    }
}

/// Top-level exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Web server configuration.
    pub web: WebConfig,

    /// Monitored server configuration.
    pub database: DatabaseConfig,

    /// Per-scraper default enable flags.
    pub scrapers: ScrapersConfig,
}

impl ExporterConfig {
    /// Load configuration from a YAML file.
    ///
    /// Does not validate: callers validate after applying CLI/environment
    /// overrides on top of the file values.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Validate the merged configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.web.listen_address.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid listen address: '{}'",
                self.web.listen_address
            ))
        })?;

        if !self.web.telemetry_path.starts_with('/') || self.web.telemetry_path == "/" {
            return Err(ConfigError::Validation(format!(
                "telemetry path must start with '/' and not be the root: '{}'",
                self.web.telemetry_path
            )));
        }

        if self.database.dsn.is_empty() {
            return Err(ConfigError::Validation(
                "database dsn must be set".to_string(),
            ));
        }

        if self.database.database.is_empty() {
            return Err(ConfigError::Validation(
                "database name must be set".to_string(),
            ));
        }

        if self.database.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "connect_timeout must be positive".to_string(),
            ));
        }

        if self.database.max_lifetime.is_zero() {
            return Err(ConfigError::Validation(
                "max_lifetime must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
