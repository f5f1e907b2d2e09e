// ============================================================================
// SECTION 8: CONFIGURATION SYSTEM
// ============================================================================
// Layered configuration, lowest precedence first:
// - built-in defaults
// - optional TOML file (`--config`)
// - plain environment variables (ADDRESS, STORE_INTERVAL, KEY, ...)
// - command-line flags
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::Signer;
use crate::constants::*;
use crate::error::ConfigError;

// ----------------------------------------------------------------------------
// 8.1 Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
            colors: true,
        }
    }
}

// ----------------------------------------------------------------------------
// 8.2 Server Configuration
// ----------------------------------------------------------------------------

/// Collector process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub address: String,
    /// Seconds between snapshots; 0 = write-through
    pub store_interval: u64,
    /// Snapshot file; empty disables the snapshot
    pub file_storage_path: String,
    pub restore_on_start: bool,
    /// Postgres DSN; empty disables the mirror
    pub database_dsn: String,
    /// HMAC key; empty disables signature checks
    pub shared_secret_key: String,
    /// Concurrent request cap
    pub max_connections: usize,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            store_interval: DEFAULT_STORE_INTERVAL_SECS,
            file_storage_path: DEFAULT_FILE_STORAGE_PATH.into(),
            restore_on_start: DEFAULT_RESTORE_ON_START,
            database_dsn: String::new(),
            shared_secret_key: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            logging: LoggingConfig::default(),
        }
    }
}

const SERVER_ENV_KEYS: &[&str] = &[
    "ADDRESS",
    "STORE_INTERVAL",
    "FILE_STORAGE_PATH",
    "RESTORE",
    "DATABASE_DSN",
    "KEY",
    "MAX_CONNECTIONS",
    "LOG_LEVEL",
];

impl ServerConfig {
    /// Defaults, then the optional TOML file, then environment variables
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = layered(Self::default(), file, SERVER_ENV_KEYS)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Full resolution: file + env, then command-line overrides
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let mut config: Self = layered(Self::default(), args.config.as_deref(), SERVER_ENV_KEYS)?;
        args.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::invalid_value("address", "must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value("max_connections", "must be at least 1"));
        }
        validate_logging(&self.logging)
    }

    #[inline]
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval)
    }

    /// Socket address to bind; a bare `:port` listens on every interface
    pub fn listen_address(&self) -> String {
        let address = self.address.trim();
        match address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => address.to_string(),
        }
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        non_empty(&self.file_storage_path).map(PathBuf::from)
    }

    pub fn database_dsn(&self) -> Option<&str> {
        non_empty(&self.database_dsn)
    }

    pub fn signer(&self) -> Option<Signer> {
        Signer::from_key(&self.shared_secret_key)
    }
}

// ----------------------------------------------------------------------------
// 8.3 Agent Configuration
// ----------------------------------------------------------------------------

/// Producer process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector address, with or without `http://`
    pub address: String,
    pub poll_interval: u64,
    pub report_interval: u64,
    pub shared_secret_key: String,
    /// Batches in flight at once
    pub rate_limit: usize,
    pub batch_size: usize,
    pub logging: LoggingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            report_interval: DEFAULT_REPORT_INTERVAL_SECS,
            shared_secret_key: String::new(),
            rate_limit: DEFAULT_RATE_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            logging: LoggingConfig::default(),
        }
    }
}

const AGENT_ENV_KEYS: &[&str] = &[
    "ADDRESS",
    "POLL_INTERVAL",
    "REPORT_INTERVAL",
    "KEY",
    "RATE_LIMIT",
    "BATCH_SIZE",
    "LOG_LEVEL",
];

impl AgentConfig {
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = layered(Self::default(), file, AGENT_ENV_KEYS)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args(args: AgentArgs) -> Result<Self, ConfigError> {
        let mut config: Self = layered(Self::default(), args.config.as_deref(), AGENT_ENV_KEYS)?;
        args.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::invalid_value("address", "must not be empty"));
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::invalid_value("poll_interval", "must be > 0"));
        }
        if self.report_interval == 0 {
            return Err(ConfigError::invalid_value("report_interval", "must be > 0"));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::invalid_value("rate_limit", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be at least 1"));
        }
        validate_logging(&self.logging)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    #[inline]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn signer(&self) -> Option<Signer> {
        Signer::from_key(&self.shared_secret_key)
    }

    /// Base URL of the collector, `http://` added when no scheme is given.
    /// A bare `:port` targets the local host.
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else if let Some(port) = address.strip_prefix(':') {
            format!("http://localhost:{port}")
        } else {
            format!("http://{address}")
        }
    }
}

// ----------------------------------------------------------------------------
// 8.4 Command Line
// ----------------------------------------------------------------------------

/// Metrics collector
#[derive(Parser, Debug, Default)]
#[command(name = "vitals-server", version = VITALS_VERSION, about = "Metrics collector")]
pub struct ServerArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Snapshot interval in seconds (0 = write-through)
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,

    /// Snapshot file path (empty disables snapshots)
    #[arg(short = 'f', long)]
    pub file_storage_path: Option<String>,

    /// Restore from the snapshot on start
    #[arg(short = 'r', long)]
    pub restore: Option<bool>,

    /// Postgres DSN for the mirror
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,

    /// Shared secret for HashSHA256
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Maximum concurrent requests
    #[arg(short = 'c', long)]
    pub max_connections: Option<usize>,

    /// Log level
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,
}

impl ServerArgs {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(v) = self.address {
            config.address = v;
        }
        if let Some(v) = self.store_interval {
            config.store_interval = v;
        }
        if let Some(v) = self.file_storage_path {
            config.file_storage_path = v;
        }
        if let Some(v) = self.restore {
            config.restore_on_start = v;
        }
        if let Some(v) = self.database_dsn {
            config.database_dsn = v;
        }
        if let Some(v) = self.key {
            config.shared_secret_key = v;
        }
        if let Some(v) = self.max_connections {
            config.max_connections = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
    }
}

/// Telemetry agent
#[derive(Parser, Debug, Default)]
#[command(name = "vitals-agent", version = VITALS_VERSION, about = "Host telemetry agent")]
pub struct AgentArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Collector address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Sampling interval in seconds
    #[arg(short = 'p', long)]
    pub poll_interval: Option<u64>,

    /// Reporting interval in seconds
    #[arg(short = 'r', long)]
    pub report_interval: Option<u64>,

    /// Shared secret for HashSHA256
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Concurrent outbound batches
    #[arg(short = 'l', long)]
    pub rate_limit: Option<usize>,

    /// Metrics per batch
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,
}

impl AgentArgs {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(v) = self.address {
            config.address = v;
        }
        if let Some(v) = self.poll_interval {
            config.poll_interval = v;
        }
        if let Some(v) = self.report_interval {
            config.report_interval = v;
        }
        if let Some(v) = self.key {
            config.shared_secret_key = v;
        }
        if let Some(v) = self.rate_limit {
            config.rate_limit = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
    }
}

// ----------------------------------------------------------------------------
// 8.5 Helpers
// ----------------------------------------------------------------------------

fn layered<T>(defaults: T, file: Option<&Path>, env_keys: &[&str]) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        if !path.exists() {
            return Err(ConfigError::parse(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    let env = Env::raw().only(env_keys).map(|key| {
        let mapped = match key.as_str().to_ascii_lowercase().as_str() {
            "restore" => "restore_on_start".to_string(),
            "key" => "shared_secret_key".to_string(),
            "log_level" => "logging.level".to_string(),
            other => other.to_string(),
        };
        mapped.into()
    });

    figment
        .merge(env)
        .extract()
        .map_err(|e| ConfigError::parse(e.to_string()))
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    const FORMATS: &[&str] = &["pretty", "compact", "json"];

    if !LEVELS.contains(&logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.level",
            format!("unknown level '{}'", logging.level),
        ));
    }
    if !FORMATS.contains(&logging.format.as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.format",
            format!("unknown format '{}'", logging.format),
        ));
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
