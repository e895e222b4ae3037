//! Configuration management for the PaperDrop daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/paperdrop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::transfer::{DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("buffer_size must be between 1024 and 1048576 bytes, got {0}")]
    InvalidBufferSize(usize),

    #[error("read_timeout_secs must be greater than 0")]
    InvalidReadTimeout,

    #[error("port must be greater than 0")]
    InvalidPort,

    #[error("bind_address is not a valid IP address: {0}")]
    InvalidBindAddress(String),

    #[error("mount_name must start with '/', got {0}")]
    InvalidMountName(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the PaperDrop daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Storage mount configuration.
    pub storage: StorageConfig,

    /// Device identity reported by the info endpoint.
    pub device: DeviceConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stdout when unset.
    pub log_dir: Option<PathBuf>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_address: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Size of the shared transfer buffer in bytes.
    pub buffer_size: usize,

    /// Seconds to wait for each read of a request before it counts as a timeout.
    pub read_timeout_secs: u64,

    /// Consecutive body read timeouts tolerated per request (0 = unlimited).
    pub max_read_retries: u32,
}

/// Storage mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Host directory served as the storage root.
    pub root: PathBuf,

    /// Client-visible name of the mount point; protected from removal.
    pub mount_name: String,

    /// Include dot-files in directory listings.
    pub show_hidden: bool,
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Model name reported by the info endpoint.
    pub name: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 80,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout_secs: 5,
            max_read_retries: 12,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sdcard"),
            mount_name: "/sdcard".to_string(),
            show_hidden: true,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "M5PaperS3".to_string(),
        }
    }
}

impl ServerConfig {
    /// Per-read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paperdrop")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PAPERDROP_PORT: Override the listen port
    /// - PAPERDROP_STORAGE_ROOT: Override the storage root directory
    /// - PAPERDROP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PAPERDROP_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid PAPERDROP_PORT value: {}", port);
                    }
                }
            }
        }

        if let Ok(root) = std::env::var("PAPERDROP_STORAGE_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding storage root from environment: {}", root);
                self.storage.root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("PAPERDROP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let buffer_size = self.server.buffer_size;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer_size) {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }

        if self.server.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidReadTimeout);
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.server.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        if !self.storage.mount_name.starts_with('/') {
            return Err(ConfigError::InvalidMountName(
                self.storage.mount_name.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("PAPERDROP_PORT");
        std::env::remove_var("PAPERDROP_STORAGE_ROOT");
        std::env::remove_var("PAPERDROP_LOG_LEVEL");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_dir, None);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 80);
        assert_eq!(config.server.buffer_size, 16 * 1024);
        assert_eq!(config.server.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.max_read_retries, 12);
        assert_eq!(config.storage.root, PathBuf::from("/sdcard"));
        assert_eq!(config.storage.mount_name, "/sdcard");
        assert!(config.storage.show_hidden);
        assert_eq!(config.device.name, "M5PaperS3");
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        // Everything else keeps its default
        assert_eq!(config.server.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_from_toml_full() {
        let config = Config::from_toml(
            r#"
            [daemon]
            log_level = "debug"
            log_dir = "/var/log/paperdrop"

            [server]
            bind_address = "127.0.0.1"
            port = 8000
            buffer_size = 4096
            read_timeout_secs = 2
            max_read_retries = 0

            [storage]
            root = "/mnt/card"
            mount_name = "/card"
            show_hidden = false

            [device]
            name = "Reader"
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.log_dir, Some(PathBuf::from("/var/log/paperdrop")));
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.buffer_size, 4096);
        assert_eq!(config.server.max_read_retries, 0);
        assert_eq!(config.storage.root, PathBuf::from("/mnt/card"));
        assert_eq!(config.storage.mount_name, "/card");
        assert!(!config.storage.show_hidden);
        assert_eq!(config.device.name, "Reader");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nport = 1");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid TOML configuration"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[server]\nport = \"eighty\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 81
            something_else = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 81);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.server.port = 9090;
        config.daemon.log_dir = Some(PathBuf::from("/tmp/logs"));

        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device.name = "Bench Reader".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("paperdrop/config.toml"));
    }

    // ========================================================================
    // Environment overrides
    // ========================================================================

    #[test]
    #[serial]
    fn test_env_override_port() {
        clear_env();
        std::env::set_var("PAPERDROP_PORT", "8080");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 8080);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        clear_env();
        std::env::set_var("PAPERDROP_PORT", "http");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 80);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_storage_root() {
        clear_env();
        std::env::set_var("PAPERDROP_STORAGE_ROOT", "/mnt/sd");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.root, PathBuf::from("/mnt/sd"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("PAPERDROP_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("PAPERDROP_LOG_LEVEL", "");
        std::env::set_var("PAPERDROP_STORAGE_ROOT", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_buffer_size_bounds() {
        let mut config = Config::default();

        config.server.buffer_size = MIN_BUFFER_SIZE - 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBufferSize(MIN_BUFFER_SIZE - 1))
        );

        config.server.buffer_size = MAX_BUFFER_SIZE + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBufferSize(MAX_BUFFER_SIZE + 1))
        );

        config.server.buffer_size = MIN_BUFFER_SIZE;
        assert!(config.validate().is_ok());
        config.server.buffer_size = MAX_BUFFER_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.server.read_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReadTimeout));
    }

    #[test]
    fn test_validate_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );

        config.server.bind_address = "::".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_mount_name() {
        let mut config = Config::default();
        config.storage.mount_name = "sdcard".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMountName("sdcard".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = Config::default();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
