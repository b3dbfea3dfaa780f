//! Configuration module for SerialBench-RS
//!
//! This module handles application configuration including:
//! - Connection defaults (baud rate, I/O timeouts, reader polling)
//! - Port discovery and auto-send timing
//! - Pipeline and event channel tuning
//! - Logging filter and optional log directory
//!
//! # Config Location
//!
//! The default config file is stored in the platform-appropriate location:
//! - **Linux**: `~/.config/dev.hxyulin.serialbench-rs/serialbench.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.serialbench-rs/serialbench.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.serialbench-rs\serialbench.toml`
//!
//! # Formats
//!
//! The format follows the file extension: `.json` is read and written with
//! `serde_json`, anything else as TOML. Every field has a default, so a
//! partial file is fine.
//!
//! # Example
//!
//! ```ignore
//! use serialbench_rs::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default(None);
//! config.connection.default_baud_rate = 115_200;
//! config.save("bench.toml")?;
//! ```

use crate::error::{Result, SerialBenchError};
use crate::types::{SerialSettings, DEFAULT_BAUD_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.serialbench-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "serialbench.toml";

/// Default read/write timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default auto-send interval in milliseconds
pub const DEFAULT_AUTO_SEND_INTERVAL_MS: u64 = 10;

/// Default discovery poll interval in milliseconds
pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 1000;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app config directory exists
pub fn ensure_app_config_dir() -> Result<PathBuf> {
    let dir = app_config_dir().ok_or_else(|| {
        SerialBenchError::Config("Could not determine config directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            SerialBenchError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

// ==================== App Config ====================

/// Complete configuration for the connection manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port open parameters and reader timing
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Port discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Auto-send loop
    #[serde(default)]
    pub auto_send: AutoSendConfig,

    /// Ingestion pipeline and events
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load a config file; the format follows the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SerialBenchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                SerialBenchError::Config(format!("Failed to parse {}: {}", path.display(), e))
            }),
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                SerialBenchError::Config(format!("Failed to parse {}: {}", path.display(), e))
            }),
        }
    }

    /// Load from `path` (or the default location), returning defaults on any error
    ///
    /// A missing default file is not worth a warning.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Self::default(),
            },
        };

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to `path`; the format follows the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                SerialBenchError::Config(format!("Failed to serialize config: {}", e))
            })?,
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| {
                SerialBenchError::Config(format!("Failed to serialize config: {}", e))
            })?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| {
            SerialBenchError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<PathBuf> {
        let path = ensure_app_config_dir()?.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }

    /// Serial settings for a connect at `baud_rate`
    pub fn serial_settings(&self, baud_rate: u32) -> SerialSettings {
        SerialSettings::with_baud_rate(baud_rate)
            .with_timeouts(self.connection.read_timeout(), self.connection.write_timeout())
    }
}

// ==================== Sections ====================

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Baud rate used by `connect_default`
    pub default_baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Reader wait between empty reads in milliseconds
    pub read_poll_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_TIMEOUT_MS,
            read_poll_interval_ms: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms.max(1))
    }
}

/// Port discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run the background poller
    pub enabled: bool,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Auto-send settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSendConfig {
    /// Interval between sends in milliseconds
    pub interval_ms: u64,
}

impl Default for AutoSendConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_AUTO_SEND_INTERVAL_MS,
        }
    }
}

impl AutoSendConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Pipeline and event settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Consumer idle tick in milliseconds (drives sample-rate decay)
    pub idle_tick_ms: u64,
    /// Capacity of each event subscriber channel
    pub event_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_tick_ms: 250,
            event_channel_capacity: crate::backend::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,serialbench_rs=debug".to_string(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.connection.default_baud_rate, 9600);
        assert_eq!(config.connection.read_timeout(), Duration::from_millis(5000));
        assert_eq!(config.auto_send.interval(), Duration::from_millis(10));
        assert!(config.discovery.enabled);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.toml");

        let mut config = AppConfig::default();
        config.connection.default_baud_rate = 115_200;
        config.auto_send.interval_ms = 50;
        config.logging.log_dir = Some(dir.path().join("logs"));
        config.save(&path).unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("[connection]"));
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.json");

        let mut config = AppConfig::default();
        config.discovery.enabled = false;
        config.save(&path).unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().trim_start().starts_with('{'));
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[connection]\ndefault_baud_rate = 57600\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.connection.default_baud_rate, 57_600);
        assert_eq!(config.connection.write_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_load_or_default_on_bad_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "connection = [[[").unwrap();

        assert!(AppConfig::load(&path).is_err());
        assert_eq!(AppConfig::load_or_default(Some(&path)), AppConfig::default());
    }

    #[test]
    fn test_serial_settings_use_configured_timeouts() {
        let mut config = AppConfig::default();
        config.connection.read_timeout_ms = 100;
        config.connection.write_timeout_ms = 200;

        let settings = config.serial_settings(19_200);
        assert_eq!(settings.baud_rate, 19_200);
        assert_eq!(settings.read_timeout, Duration::from_millis(100));
        assert_eq!(settings.write_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let mut config = AppConfig::default();
        config.auto_send.interval_ms = 0;
        config.connection.read_poll_interval_ms = 0;
        assert_eq!(config.auto_send.interval(), Duration::from_millis(1));
        assert_eq!(config.connection.read_poll_interval(), Duration::from_millis(1));
    }
}
