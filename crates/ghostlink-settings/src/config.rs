//! Configuration for the ghostlink client
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats, chosen by file extension, stored in the platform
//! configuration directory by default.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (daemon address, reconnect policy)
//! - Protocol timers (heartbeat, readiness timeout, abnormal-close alert age)
//! - Diagnostics (bounded log and received-frame history sizes)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use ghostlink_core::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Host running the device-control daemon
    pub host: String,
    /// Daemon WebSocket port
    pub port: u16,
    /// Reopen a fresh socket after the daemon closes the connection
    pub auto_reconnect: bool,
    /// Delay before an automatic reconnect, in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
        }
    }
}

impl ConnectionSettings {
    /// Endpoint for a given method on the configured daemon
    pub fn endpoint(&self, method: impl Into<String>) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, method)
    }

    /// Reconnect delay as a `Duration`
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Protocol timer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Interval between heartbeat pings, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Bounded wait for a session endpoint to report `ready`, in milliseconds
    pub readiness_timeout_ms: u64,
    /// Minimum connection age before an abnormal close raises an alert,
    /// in milliseconds
    pub abnormal_alert_age_ms: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            readiness_timeout_ms: 10_000,
            abnormal_alert_age_ms: 60_000,
        }
    }
}

impl ProtocolSettings {
    /// Heartbeat interval as a `Duration`
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Readiness timeout as a `Duration`
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Abnormal-close alert age as a `Duration`
    pub fn abnormal_alert_age(&self) -> Duration {
        Duration::from_millis(self.abnormal_alert_age_ms)
    }
}

/// Diagnostic buffer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Entries kept in each connection's exportable log
    pub log_capacity: usize,
    /// Received frames kept per connection
    pub history_capacity: usize,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            log_capacity: 500,
            history_capacity: 1000,
        }
    }
}

/// Complete client configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Protocol timers
    pub protocol: ProtocolSettings,
    /// Diagnostic buffers
    pub diagnostics: DiagnosticsSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location, `<config dir>/ghostlink/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("ghostlink").join("config.toml"))
            .ok_or(SettingsError::NoConfigDirectory)
    }

    /// Load from file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::read(path, e))?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save to file, creating parent directories as needed
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::write(parent, e))?;
        }

        std::fs::write(path, content)
            .map_err(|e| SettingsError::write(path, e))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.host.trim().is_empty() {
            return Err(out_of_range("connection.host", "\"\""));
        }

        if self.connection.port == 0 {
            return Err(out_of_range("connection.port", 0));
        }

        let timers = [
            ("protocol.heartbeat_interval_ms", self.protocol.heartbeat_interval_ms),
            ("protocol.readiness_timeout_ms", self.protocol.readiness_timeout_ms),
        ];
        for (key, value) in timers {
            if value == 0 {
                return Err(out_of_range(key, value));
            }
        }

        if self.diagnostics.log_capacity == 0 {
            return Err(out_of_range("diagnostics.log_capacity", 0));
        }

        if self.diagnostics.history_capacity == 0 {
            return Err(out_of_range("diagnostics.history_capacity", 0));
        }

        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
        }
    }
}

fn out_of_range(key: &str, value: impl ToString) -> SettingsError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.connection.port, 8000);
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.protocol.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.protocol.readiness_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_from_settings() {
        let settings = ConnectionSettings::default();
        assert_eq!(
            settings.endpoint("3dprint-slicing").url(),
            "ws://localhost:8000/ws/3dprint-slicing"
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.protocol.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.connection.host = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.diagnostics.log_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[connection]\nport = 8080\n").unwrap();
        assert_eq!(config.connection.port, 8080);
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.protocol, ProtocolSettings::default());
    }
}
