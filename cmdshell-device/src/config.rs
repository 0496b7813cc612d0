//! Device configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CMDSHELL_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport configuration.
    pub transport: TransportConfig,
    /// Receiver configuration.
    pub receiver: ReceiverConfig,
    /// Command dispatch configuration.
    pub dispatch: DispatchConfig,
    /// Strings reported by the system commands.
    pub info: InfoConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CMDSHELL_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.transport.apply_env_overrides();
        self.receiver.apply_env_overrides();
        self.dispatch.apply_env_overrides();
    }

    /// Checks values that would make the receiver unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = cmdshell_protocol::MIN_MESSAGE_SIZE;
        let max = cmdshell_protocol::MAX_FRAME_SIZE;
        if self.receiver.buffer_size < min || self.receiver.buffer_size > max {
            return Err(ConfigError::Validation(format!(
                "receiver.buffer_size must be between {} and {}",
                min, max
            )));
        }
        if self.receiver.idle_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "receiver.idle_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where the serial link comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address to listen on when no device path is set.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Character device to open instead of listening, e.g. `/dev/ttyUSB0`.
    pub device: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 7500)),
            device: None,
        }
    }
}

impl TransportConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CMDSHELL_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(path) = std::env::var("CMDSHELL_DEVICE") {
            if !path.is_empty() {
                self.device = Some(PathBuf::from(path));
            }
        }
    }
}

/// Scratch buffer and idle timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Scratch buffer capacity in bytes.
    pub buffer_size: usize,
    /// Give up on a partial frame after this long without new bytes.
    pub idle_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            idle_timeout_ms: 1000,
        }
    }
}

impl ReceiverConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("CMDSHELL_IDLE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.idle_timeout_ms = ms;
            }
        }

        if let Ok(size) = std::env::var("CMDSHELL_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.buffer_size = n;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Dispatch policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Answer unknown commands with `Unsupported` instead of dropping them.
    pub reply_unsupported: bool,
}

impl DispatchConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(reply) = std::env::var("CMDSHELL_REPLY_UNSUPPORTED") {
            self.reply_unsupported = reply == "1" || reply.to_lowercase() == "true";
        }
    }
}

/// Identification strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoConfig {
    /// Text returned by `info`.
    pub info: String,
    /// Text returned by `ver`; defaults to the crate version.
    pub version: String,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            info: "cmdshell device emulator".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.bind_addr.port(), 7500);
        assert!(config.transport.device.is_none());
        assert_eq!(config.receiver.buffer_size, 512);
        assert_eq!(config.receiver.idle_timeout(), Duration::from_secs(1));
        assert!(!config.dispatch.reply_unsupported);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.transport.bind_addr, config.transport.bind_addr);
        assert_eq!(parsed.info.version, config.info.version);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "transport:\n  device: /dev/ttyUSB0\n\
             receiver:\n  idle_timeout_ms: 250\n\
             dispatch:\n  reply_unsupported: true"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.transport.device, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(config.receiver.idle_timeout_ms, 250);
        assert_eq!(config.receiver.buffer_size, 512);
        assert!(config.dispatch.reply_unsupported);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdshell.yaml");

        let mut config = Config::default();
        config.info.info = "bench unit 3".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.info.info, "bench unit 3");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/cmdshell.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/cmdshell.yaml"));
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let mut config = Config::default();
        config.receiver.buffer_size = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }
}
