//! # Configuration Management
//!
//! Centralized configuration for the framing server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! Size limits left at zero are replaced by their defaults when a server is
//! constructed (see [`ServerConfig::normalized`]), so a partially filled
//! configuration is always usable.

use crate::error::{ServerError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Length of the big-endian frame header in bytes
pub const FRAME_HEADER_LEN: usize = 8;

/// Default maximum frame size including the header (1 MiB)
pub const DEFAULT_PACKET_SIZE_LIMIT: u64 = 1024 * 1024;

/// Default size of a single socket read (1 KiB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default byte bound of a connection's processing queue (10 MiB)
pub const DEFAULT_QUEUE_PACKET_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Default entry bound of a connection's processing queue
pub const DEFAULT_QUEUE_PACKET_NUM_LIMIT: usize = 10;

/// Top-level configuration holding every configurable section
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FrameServerConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FrameServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ServerError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ServerError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from `FRAME_SERVER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unparseable numeric values are reported instead of silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("FRAME_SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(val) = lookup("FRAME_SERVER_PACKET_SIZE_LIMIT") {
            config.server.packet_size_limit = parse_env("FRAME_SERVER_PACKET_SIZE_LIMIT", &val)?;
        }
        if let Some(val) = lookup("FRAME_SERVER_READ_BUFFER_SIZE") {
            config.server.read_buffer_size = parse_env("FRAME_SERVER_READ_BUFFER_SIZE", &val)?;
        }
        if let Some(val) = lookup("FRAME_SERVER_QUEUE_PACKET_SIZE_LIMIT") {
            config.server.queue_packet_size_limit =
                parse_env("FRAME_SERVER_QUEUE_PACKET_SIZE_LIMIT", &val)?;
        }
        if let Some(val) = lookup("FRAME_SERVER_QUEUE_PACKET_NUM_LIMIT") {
            config.server.queue_packet_num_limit =
                parse_env("FRAME_SERVER_QUEUE_PACKET_NUM_LIMIT", &val)?;
        }
        if let Some(val) = lookup("FRAME_SERVER_READ_TIMEOUT_MS") {
            let millis: u64 = parse_env("FRAME_SERVER_READ_TIMEOUT_MS", &val)?;
            config.server.read_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(val) = lookup("FRAME_SERVER_WRITE_TIMEOUT_MS") {
            let millis: u64 = parse_env("FRAME_SERVER_WRITE_TIMEOUT_MS", &val)?;
            config.server.write_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(path) = lookup("FRAME_SERVER_TLS_CERT_PATH") {
            config.server.tls_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("FRAME_SERVER_TLS_KEY_PATH") {
            config.server.tls_key_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup("FRAME_SERVER_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ServerError::ConfigError(format!("Invalid log level: {level}")))?;
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
            .map_err(|e| ServerError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.server.validate();
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ServerError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Maximum frame size in bytes, including the 8-byte length prefix
    pub packet_size_limit: u64,

    /// Size of each socket read
    pub read_buffer_size: usize,

    /// Maximum bytes waiting in a connection's processing queue
    pub queue_packet_size_limit: u64,

    /// Maximum frames waiting in a connection's processing queue
    pub queue_packet_num_limit: usize,

    /// Idle read timeout; `None` waits forever
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,

    /// Per-frame write timeout; `None` waits forever
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<Duration>,

    /// PEM certificate chain. TLS is enabled only when the key is set too.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM PKCS#8 private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            packet_size_limit: DEFAULT_PACKET_SIZE_LIMIT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_packet_size_limit: DEFAULT_QUEUE_PACKET_SIZE_LIMIT,
            queue_packet_num_limit: DEFAULT_QUEUE_PACKET_NUM_LIMIT,
            read_timeout: None,
            write_timeout: None,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Replace zero-valued limits with their defaults
    pub fn normalized(mut self) -> Self {
        if self.packet_size_limit == 0 {
            self.packet_size_limit = DEFAULT_PACKET_SIZE_LIMIT;
        }
        if self.read_buffer_size == 0 {
            self.read_buffer_size = DEFAULT_READ_BUFFER_SIZE;
        }
        if self.queue_packet_size_limit == 0 {
            self.queue_packet_size_limit = DEFAULT_QUEUE_PACKET_SIZE_LIMIT;
        }
        if self.queue_packet_num_limit == 0 {
            self.queue_packet_num_limit = DEFAULT_QUEUE_PACKET_NUM_LIMIT;
        }
        self
    }

    /// Largest payload a frame may declare
    pub fn max_payload_size(&self) -> u64 {
        self.packet_size_limit
            .saturating_sub(FRAME_HEADER_LEN as u64)
    }

    /// Certificate and key paths, if both are configured
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        // Zero means "use the default", anything else must leave room for a payload
        if self.packet_size_limit != 0 && self.packet_size_limit <= FRAME_HEADER_LEN as u64 {
            errors.push(format!(
                "Packet size limit too small: {} (must exceed the {FRAME_HEADER_LEN}-byte header)",
                self.packet_size_limit
            ));
        }

        if self.read_buffer_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Read buffer size too large: {} bytes (maximum: 16 MB)",
                self.read_buffer_size
            ));
        }

        if self.queue_packet_size_limit != 0
            && self.packet_size_limit != 0
            && self.queue_packet_size_limit < self.max_payload_size()
        {
            errors.push(
                "Queue packet size limit is smaller than the largest allowed payload".to_string(),
            );
        }

        if let Some(timeout) = self.read_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Read timeout too short (minimum: 10ms)".to_string());
            }
        }

        if let Some(timeout) = self.write_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Write timeout too short (minimum: 10ms)".to_string());
            }
        }

        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(_), None) => {
                errors.push("TLS certificate path set without a key path".to_string())
            }
            (None, Some(_)) => {
                errors.push("TLS key path set without a certificate path".to_string())
            }
            _ => {}
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
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
            app_name: String::from("frame-server"),
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

/// Optional durations stored as milliseconds
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
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
