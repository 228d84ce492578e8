// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

use tracing::warn;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/cwagent.sock";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Logger(#[from] cwlogger::ConstructionError),

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Relay settings; engine and sink settings are read by `cwlogger` itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Unix socket to listen on when not reading stdin
    pub socket_path: PathBuf,
    /// Read stdin until EOF instead of listening on the socket
    pub stdin: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            stdin: false,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, AgentError> {
        let socket_path = env::var("CWLOGGER_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH));
        let stdin = env::var("CWLOGGER_STDIN")
            .map(|val| val.to_lowercase() == "true" || val == "1")
            .unwrap_or(false);
        let log_level = log_level_from_env();

        let config = Self {
            socket_path,
            stdin,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AgentError> {
        if !self.stdin {
            if self.socket_path.as_os_str().is_empty() {
                return Err(AgentError::InvalidConfig(
                    "CWLOGGER_SOCKET cannot be empty".to_string(),
                ));
            }
            if !self.socket_path.is_absolute() {
                return Err(AgentError::InvalidConfig(format!(
                    "Socket path should be absolute. Got: {}",
                    self.socket_path.display()
                )));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(AgentError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

pub fn log_level_from_env() -> String {
    env::var("CWLOGGER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string())
}

/// Default stream name: `HOSTNAME`, then the system hostname, then "unknown"
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str() {
                if !hostname.is_empty() {
                    return hostname.to_string();
                }
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_path, PathBuf::from("/var/run/cwagent.sock"));
    }

    #[test]
    fn test_validate_relative_socket() {
        let config = AgentConfig {
            socket_path: PathBuf::from("cwagent.sock"),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // ignored in stdin mode
        let config = AgentConfig {
            socket_path: PathBuf::from("cwagent.sock"),
            stdin: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AgentConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_get_hostname_not_empty() {
        assert!(!get_hostname().is_empty());
    }
}
