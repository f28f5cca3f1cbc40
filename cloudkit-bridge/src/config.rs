//! Configuration loading for cloudkit-bridge.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional; an empty file yields degraded mode with no completion timeout.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::provider::DEFAULT_UNAVAILABLE_MESSAGE;

/// Root configuration for a bridge session.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Provider selection.
    pub provider: ProviderConfig,
    /// Completion relay settings.
    pub relay: RelayConfig,
    /// Log filter used by the binaries.
    pub logging: LoggingConfig,
}

/// Which provider backs a session.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Degraded mode: no CloudKit.
    #[default]
    Disabled,
    /// The provider registered through the C function table.
    Native,
}

impl FromStr for ProviderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(ProviderMode::Disabled),
            "native" => Ok(ProviderMode::Native),
            other => Err(ConfigError::Invalid(format!(
                "unknown provider mode {:?} (expected \"disabled\" or \"native\")",
                other
            ))),
        }
    }
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider mode (default: disabled).
    #[serde(default)]
    pub mode: ProviderMode,
    /// Failure message for saves and deletes in degraded mode.
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,
}

/// Completion relay configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    /// Fail a completion the provider has not answered after this many
    /// milliseconds. 0 disables the timeout (default: 0).
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive (default: info).
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_unavailable_message() -> String {
    DEFAULT_UNAVAILABLE_MESSAGE.to_string()
}

fn default_completion_timeout_ms() -> u64 {
    0 // no timeout
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::default(),
            unavailable_message: default_unavailable_message(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: default_completion_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.unavailable_message.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.unavailable_message must not be empty".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The completion timeout, or `None` when disabled.
    pub fn completion_timeout(&self) -> Option<Duration> {
        match self.relay.completion_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but makes no sense.
    #[error("invalid config: {0}")]
    Invalid(String),
}
