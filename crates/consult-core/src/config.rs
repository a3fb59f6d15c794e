//! Configuration management.
//!
//! Centralized config with environment-variable overrides, file loading, and
//! validation, mirroring the defaults-then-override pattern used throughout
//! this codebase's other config modules.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    Io { message: String },

    #[error("configuration parsing error: {message}")]
    Parse { message: String },
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub session_defaults: SessionDefaultsConfig,
}

/// HTTP/WebSocket edge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    /// CORS origin allow-list; empty disables CORS, `["*"]` is permissive.
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
    /// Idle time before a subscriber's WebSocket heartbeat is considered lost.
    pub ws_heartbeat_interval_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec![],
            max_body_bytes: 64 * 1024,
            ws_heartbeat_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Defaults baked into every new session and into the activity tracker armed
/// for its participants. A session's own `SessionConfig` (reading/consultation
/// minutes, topics) is chosen per-session by its doctor and is not covered
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaultsConfig {
    pub idle_timeout_secs: u64,
    pub feedback_phase_seconds: u64,
    /// Number of attempts `generate_unique_code` makes before giving up.
    pub code_generation_attempts: u32,
}

impl Default for SessionDefaultsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: crate::types::DEFAULT_IDLE_TIMEOUT_SECS,
            feedback_phase_seconds: crate::types::FEEDBACK_PHASE_SECONDS,
            code_generation_attempts: 32,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind) = env::var("CONSULT_BIND_ADDRESS") {
            config.api.bind_address = bind;
        }
        if let Ok(port) = env::var("CONSULT_PORT") {
            config.api.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CONSULT_PORT".to_string(),
                reason: "not a valid port number".to_string(),
            })?;
        }
        if let Ok(origins) = env::var("CONSULT_CORS_ORIGINS") {
            config.api.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(level) = env::var("CONSULT_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(secs) = env::var("CONSULT_IDLE_TIMEOUT_SECS") {
            config.session_defaults.idle_timeout_secs =
                secs.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "CONSULT_IDLE_TIMEOUT_SECS".to_string(),
                    reason: "not a valid integer".to_string(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            message: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.port".to_string(),
                reason: "port cannot be 0".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        if self.session_defaults.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session_defaults.idle_timeout_secs".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self.session_defaults.code_generation_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session_defaults.code_generation_attempts".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.api.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_port_zero() {
        let mut config = Config::default();
        config.api.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let mut config = Config::default();
        config.session_defaults.idle_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
