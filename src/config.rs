//! # Configuration Management
//!
//! Centralized configuration for the UDP transport.
//!
//! This module groups every tunable of the client into four sections:
//! connection lifecycle timing, secure channel options, buffer sizing and
//! logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment overrides via `from_env()` (prefix `TOS_NET_`)
//! - Direct instantiation with defaults
//!
//! ## Defaults
//! - Connect timeout 3 s, retry interval 10 s, retry disabled
//! - Keep-alive timeout 15 s
//! - Compression above 512 bytes on the secure channel

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default server port
pub const DEFAULT_SERVER_PORT: u16 = 3565;

/// Default size threshold above which secure payloads are compressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

/// Largest datagram the transport reads in one call
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Connection lifecycle configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Secure channel configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Buffer sizing configuration
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TOS_NET_SERVER_ADDRESS") {
            config.client.server_address = addr;
        }

        if let Ok(port) = std::env::var("TOS_NET_SERVER_PORT") {
            config.client.server_port = port.parse::<u16>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid TOS_NET_SERVER_PORT '{port}': {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("TOS_NET_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("TOS_NET_RETRY_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.client.retry_interval = Duration::from_millis(val);
            }
        }

        if let Ok(enabled) = std::env::var("TOS_NET_RETRY_ENABLED") {
            if let Ok(val) = enabled.parse::<bool>() {
                config.client.retry_enabled = val;
            }
        }

        if let Ok(enabled) = std::env::var("TOS_NET_ENCRYPTION_ENABLED") {
            if let Ok(val) = enabled.parse::<bool>() {
                config.security.encryption_enabled = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.security.validate());
        errors.extend(self.performance.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server host name or IP address
    pub server_address: String,

    /// Server UDP port
    pub server_port: u16,

    /// Time allowed in `Connecting` before the attempt is declared failed
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Time spent in `ConnectionFailed` before a retry is issued
    #[serde(with = "duration_serde")]
    pub retry_interval: Duration,

    /// Whether failed attempts are retried automatically
    pub retry_enabled: bool,

    /// Idle time while `Connected` after which the link is dropped
    #[serde(with = "duration_serde")]
    pub keepalive_timeout: Duration,

    /// Period of the retry timer task
    #[serde(with = "duration_serde")]
    pub retry_tick: Duration,

    /// Sleep between empty socket polls
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Requested `SO_RCVBUF` size in bytes
    pub recv_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: String::from("127.0.0.1"),
            server_port: DEFAULT_SERVER_PORT,
            connect_timeout: Duration::from_secs(3),
            retry_interval: Duration::from_secs(10),
            retry_enabled: false,
            keepalive_timeout: Duration::from_secs(15),
            retry_tick: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
            recv_buffer_size: 2 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        }

        if self.server_port == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.retry_enabled && self.retry_interval.as_millis() < 100 {
            errors.push("Retry interval too short (minimum: 100ms)".to_string());
        }

        if self.keepalive_timeout <= self.retry_tick {
            errors.push("Keep-alive timeout must be longer than the retry tick".to_string());
        }

        if self.retry_tick.is_zero() {
            errors.push("Retry tick cannot be 0".to_string());
        } else if self.retry_tick > self.connect_timeout {
            errors.push("Retry tick cannot be longer than the connect timeout".to_string());
        }

        if self.poll_interval.is_zero() {
            errors.push("Poll interval cannot be 0".to_string());
        } else if self.poll_interval.as_millis() > 100 {
            errors.push("Poll interval too long (maximum: 100ms)".to_string());
        }

        if self.recv_buffer_size < 64 * 1024 {
            errors.push(format!(
                "Receive buffer too small: {} bytes (minimum: 64 KB)",
                self.recv_buffer_size
            ));
        }

        errors
    }
}

/// Secure channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Whether the handshake negotiates an AEAD session
    pub encryption_enabled: bool,

    /// Whether large secure payloads are compressed
    pub compression_enabled: bool,

    /// Minimum sealed payload size (bytes) before compression is attempted
    pub compression_threshold: usize,

    /// Whether `CheckIntegrity` challenges are answered
    pub integrity_check_enabled: bool,

    /// Bytes sealed under one key pair before a rekey is due
    pub rekey_bytes_threshold: u64,

    /// Session age after which a rekey is due
    #[serde(with = "duration_serde")]
    pub rekey_interval: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            compression_enabled: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            integrity_check_enabled: true,
            rekey_bytes_threshold: 1024 * 1024 * 1024,
            rekey_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl SecurityConfig {
    /// Validate security configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.compression_enabled && self.compression_threshold == 0 {
            errors.push("Compression threshold must be greater than 0".to_string());
        }

        if self.compression_threshold > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Compression threshold {} exceeds the largest datagram ({MAX_DATAGRAM_SIZE})",
                self.compression_threshold
            ));
        }

        if self.rekey_bytes_threshold < 1024 * 1024 {
            errors.push("Rekey byte threshold too small (minimum: 1 MB)".to_string());
        }

        if self.rekey_interval.as_secs() < 60 {
            errors.push("Rekey interval too short (minimum: 60s)".to_string());
        }

        if !self.encryption_enabled {
            errors.push(
                "WARNING: Encryption is disabled - not recommended for production".to_string(),
            );
        }

        errors
    }
}

/// Buffer sizing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    /// Largest datagram the client will send, signature or header included
    pub max_packet_size: usize,

    /// Buffers created up front in the pool
    pub pool_prealloc: usize,

    /// Capacity of each pooled buffer
    pub buffer_capacity: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 1200,
            pool_prealloc: 32,
            buffer_capacity: 1500,
        }
    }
}

impl PerformanceConfig {
    /// Validate performance configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size < 64 {
            errors.push("Max packet size too small (minimum: 64 bytes)".to_string());
        } else if self.max_packet_size > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum: {MAX_DATAGRAM_SIZE})",
                self.max_packet_size
            ));
        }

        if self.buffer_capacity < self.max_packet_size {
            errors.push("Buffer capacity cannot be smaller than max packet size".to_string());
        }

        if self.pool_prealloc > 4096 {
            errors.push(format!(
                "Pool preallocation very high: {} buffers (maximum: 4096)",
                self.pool_prealloc
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("tos-net"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_values() {
        let config = NetworkConfig::default();
        assert_eq!(config.client.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.client.retry_interval, Duration::from_secs(10));
        assert!(!config.client.retry_enabled);
        assert_eq!(config.client.keepalive_timeout, Duration::from_secs(15));
        assert_eq!(config.security.compression_threshold, 512);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [client]
            server_address = "10.0.0.5"
            server_port = 4000
            connect_timeout = 200
            retry_interval = 500
            retry_enabled = true
            keepalive_timeout = 15000
            retry_tick = 100
            poll_interval = 1
            recv_buffer_size = 2097152
        "#;
        let config = NetworkConfig::from_toml(toml).unwrap();
        assert_eq!(config.client.server_port, 4000);
        assert_eq!(config.client.connect_timeout, Duration::from_millis(200));
        assert!(config.client.retry_enabled);
        assert!(config.security.encryption_enabled);
        assert_eq!(config.logging.log_level, Level::INFO);
    }
}
