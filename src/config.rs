//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Both binaries read the same file so they agree on the snapshot path.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::radio::LinkConfiguration;
use crate::store::DEFAULT_SNAPSHOT_PATH;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub link: LinkConfiguration,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which radio implementation to drive
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// UART AT-command LoRa modem
    #[default]
    Serial,
    /// Scripted link emitting beacon packets, for dry runs without hardware
    Simulated,
}

/// Radio transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default)]
    pub transport: Transport,

    /// Serial device; empty auto-detects
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Receive loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Bound on each receive call
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Pause after a link fault before listening again
    #[serde(default = "default_link_fault_backoff_ms")]
    pub link_fault_backoff_ms: u64,
}

/// Snapshot file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_path")]
    pub path: String,
}

/// HTTP adapter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Directory holding the built front end
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily rolling log file; empty disables file logging
    #[serde(default)]
    pub directory: String,
}

// Default value functions
fn default_baud_rate() -> u32 { 115_200 }

fn default_receive_timeout_ms() -> u64 { 1000 }
fn default_link_fault_backoff_ms() -> u64 { 1000 }

fn default_snapshot_path() -> String { DEFAULT_SNAPSHOT_PATH.to_string() }

fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_http_port() -> u16 { 5000 }
fn default_static_dir() -> String { "dist".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            link_fault_backoff_ms: default_link_fault_backoff_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { path: default_snapshot_path() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_http_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
        }
    }
}

impl GatewayConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn link_fault_backoff(&self) -> Duration {
        Duration::from_millis(self.link_fault_backoff_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_gateway::config::Config;
    ///
    /// let config = Config::load("config/gateway.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load `path` if given, otherwise use built-in defaults
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.receive_timeout_ms == 0 || self.gateway.receive_timeout_ms > 60000 {
            return Err(invalid("receive_timeout_ms must be between 1 and 60000"));
        }

        if self.gateway.link_fault_backoff_ms == 0 || self.gateway.link_fault_backoff_ms > 60000 {
            return Err(invalid("link_fault_backoff_ms must be between 1 and 60000"));
        }

        if self.snapshot.path.trim().is_empty() {
            return Err(invalid("snapshot path cannot be empty"));
        }

        if !(137.0..=1020.0).contains(&self.link.frequency_mhz) {
            return Err(invalid("frequency_mhz must be between 137.0 and 1020.0"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.radio.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.http.static_dir.trim().is_empty() {
            return Err(invalid("static_dir cannot be empty"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
