// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::constants;
use crate::errors::ConstructionError;
use crate::sink::SinkIdentity;
use crate::uploader::UploadLimits;

/// Sink calls allowed per rolling window. A zero capacity or window disables
/// rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub capacity: usize,
    pub window: Duration,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_RATE_LIMIT,
            window: constants::DEFAULT_RATE_WINDOW,
        }
    }
}

/// Configuration for a [`crate::logger::Logger`]
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Group and stream entries are shipped to
    pub identity: SinkIdentity,
    /// Time between scheduled flushes
    pub flush_interval: Duration,
    /// Rate limit applied to sink appends
    pub rate_budget: RateBudget,
    /// Request limits of the sink
    pub limits: UploadLimits,
    /// Bound on the final flush during shutdown, `None` waits indefinitely
    pub shutdown_timeout: Option<Duration>,
    /// Attempts per request, the first one included
    pub retry_attempts: usize,
}

impl LoggerConfig {
    /// Configuration with default settings for `identity`
    #[must_use]
    pub fn new(identity: SinkIdentity) -> Self {
        Self {
            identity,
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            rate_budget: RateBudget::default(),
            limits: UploadLimits::default(),
            shutdown_timeout: Some(constants::DEFAULT_SHUTDOWN_TIMEOUT),
            retry_attempts: constants::DEFAULT_APPEND_ATTEMPTS,
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConstructionError> {
        Self::from_lookup(None, |key| env::var(key).ok())
    }

    /// Like [`LoggerConfig::from_env`], using `default_stream` when
    /// `CWLOGGER_STREAM` is unset
    pub fn from_env_with_default_stream(default_stream: &str) -> Result<Self, ConstructionError> {
        Self::from_lookup(Some(default_stream), |key| env::var(key).ok())
    }

    fn from_lookup(
        default_stream: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConstructionError> {
        let group = lookup("CWLOGGER_GROUP")
            .ok_or_else(|| ConstructionError::InvalidConfig("CWLOGGER_GROUP is required".to_string()))?;
        let stream = lookup("CWLOGGER_STREAM")
            .or_else(|| default_stream.map(str::to_string))
            .ok_or_else(|| ConstructionError::InvalidConfig("CWLOGGER_STREAM is required".to_string()))?;

        let mut config = Self::new(SinkIdentity::new(group, stream)?);

        if let Some(secs) = parse(&lookup, "CWLOGGER_FLUSH_INTERVAL_SECS")? {
            config.flush_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse(&lookup, "CWLOGGER_RATE_LIMIT")? {
            config.rate_budget.capacity = capacity;
        }
        if let Some(millis) = parse(&lookup, "CWLOGGER_RATE_WINDOW_MS")? {
            config.rate_budget.window = Duration::from_millis(millis);
        }
        if let Some(secs) = parse::<u64>(&lookup, "CWLOGGER_SHUTDOWN_TIMEOUT_SECS")? {
            // 0 disables the bound
            config.shutdown_timeout = (secs > 0).then_some(Duration::from_secs(secs));
        }
        if let Some(attempts) = parse(&lookup, "CWLOGGER_RETRY_ATTEMPTS")? {
            config.retry_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.flush_interval.is_zero() {
            return Err(ConstructionError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval > constants::MAX_FLUSH_INTERVAL {
            return Err(ConstructionError::InvalidConfig(format!(
                "Flush interval must be at most {}s, got {}s",
                constants::MAX_FLUSH_INTERVAL.as_secs(),
                self.flush_interval.as_secs()
            )));
        }

        if self.rate_budget.window > constants::MAX_RATE_WINDOW {
            return Err(ConstructionError::InvalidConfig(format!(
                "Rate window must be at most {}s, got {}s",
                constants::MAX_RATE_WINDOW.as_secs(),
                self.rate_budget.window.as_secs()
            )));
        }

        if self.retry_attempts == 0 {
            return Err(ConstructionError::InvalidConfig(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        if self.limits.max_entries_per_request == 0 {
            return Err(ConstructionError::InvalidConfig(
                "Max entries per request must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_entry_bytes == 0
            || self.limits.max_request_bytes <= self.limits.per_entry_overhead_bytes
        {
            return Err(ConstructionError::InvalidConfig(format!(
                "Request limit of {} bytes cannot hold any entry",
                self.limits.max_request_bytes
            )));
        }

        Ok(())
    }
}

/// Settings for [`crate::http_sink::HttpLogSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    /// Base URL of the logs API
    pub endpoint: String,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSinkConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            https_proxy: None,
            timeout: constants::DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConstructionError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConstructionError> {
        let endpoint = lookup("CWLOGGER_ENDPOINT").ok_or_else(|| {
            ConstructionError::InvalidConfig("CWLOGGER_ENDPOINT is required".to_string())
        })?;

        let mut config = Self::new(endpoint);
        config.auth_token = lookup("CWLOGGER_AUTH_TOKEN").filter(|token| !token.is_empty());
        config.https_proxy = lookup("CWLOGGER_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY"));
        if let Some(secs) = parse(&lookup, "CWLOGGER_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConstructionError::InvalidConfig(
                "CWLOGGER_ENDPOINT cannot be empty".to_string(),
            ));
        }

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConstructionError::InvalidConfig(format!(
                "Endpoint '{}' must start with http:// or https://",
                self.endpoint
            )));
        }

        if self.timeout.is_zero() {
            return Err(ConstructionError::InvalidConfig(
                "HTTP timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConstructionError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                ConstructionError::InvalidConfig(format!("{key} has invalid value '{raw}'"))
            })
        })
        .transpose()
}
