//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via BIDIB_CONFIG)
//! 3. Environment variables

use bidib_protocol::{MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Packet framing and worker thread timing.
    pub link: LinkConfig,
    /// Per-node credit.
    pub flow_control: FlowControlConfig,
    /// Session start-up.
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let Ok(path) = std::env::var("BIDIB_CONFIG") else {
            return Ok(Self::from_env());
        };

        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.link.apply_env_overrides();
        self.flow_control.apply_env_overrides();
        self.session.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Validates value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;
        self.flow_control.validate()?;
        Ok(())
    }
}

/// Packet framing and worker thread timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Largest framed (escaped) packet written to the sink, delimiters included.
    pub max_packet_size: usize,
    /// Interval of the periodic flush thread in milliseconds (0 = no flush thread).
    pub flush_interval_ms: u64,
    /// Sleep between reads while the byte source has nothing to deliver.
    pub receive_poll_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 64,
            flush_interval_ms: 10,
            receive_poll_interval_ms: 1,
        }
    }
}

impl LinkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("BIDIB_MAX_PACKET_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_packet_size = n;
            }
        }

        if let Ok(interval) = std::env::var("BIDIB_FLUSH_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.flush_interval_ms = ms;
            }
        }

        if let Ok(interval) = std::env::var("BIDIB_RECEIVE_POLL_MS") {
            if let Ok(ms) = interval.parse() {
                self.receive_poll_interval_ms = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(ConfigError::ValidationError(format!(
                "link.max_packet_size must be within {}..={}, got {}",
                MIN_PACKET_SIZE, MAX_PACKET_SIZE, self.max_packet_size
            )));
        }
        Ok(())
    }

    /// Returns the flush interval, or `None` when periodic flushing is off.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_interval_ms)
    }
}

/// Per-node credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    /// Messages awaiting an answer a node may have before further ones queue.
    pub default_credit: u8,
    /// Derive a node's credit from its PKT_CAPACITY report when it sends one.
    pub honor_reported_capacity: bool,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            default_credit: 4,
            honor_reported_capacity: true,
        }
    }
}

impl FlowControlConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(credit) = std::env::var("BIDIB_DEFAULT_CREDIT") {
            if let Ok(n) = credit.parse() {
                self.default_credit = n;
            }
        }

        if let Ok(honor) = std::env::var("BIDIB_HONOR_REPORTED_CAPACITY") {
            self.honor_reported_capacity = honor == "1" || honor.to_lowercase() == "true";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_credit == 0 {
            return Err(ConfigError::ValidationError(
                "flow_control.default_credit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ask the interface for its magic before declaring the session started.
    pub handshake: bool,
    /// How long to wait for the magic answer.
    pub handshake_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake: true,
            handshake_timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(handshake) = std::env::var("BIDIB_HANDSHAKE") {
            self.handshake = handshake == "1" || handshake.to_lowercase() == "true";
        }

        if let Ok(timeout) = std::env::var("BIDIB_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.handshake_timeout_ms = ms;
            }
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
