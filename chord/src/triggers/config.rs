//! Configuration types for the built-in triggers.

use crate::errors::ChordError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`TimerTrigger`](super::TimerTrigger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Tick period in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 {
    1000
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
        }
    }
}

impl TimerConfig {
    /// Sets the period, rounded up to whole milliseconds.
    ///
    /// Only [`Duration::ZERO`] maps to a zero period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        let millis = period.as_nanos().div_ceil(1_000_000);
        self.period_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    /// Returns the period as a duration.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Configuration for [`HttpTrigger`](super::HttpTrigger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTriggerConfig {
    /// Socket address to listen on, e.g. "127.0.0.1:8080".
    #[serde(default = "default_address")]
    pub address: String,
    /// Route path handled by the trigger. Must start with '/'.
    #[serde(default = "default_path")]
    pub path: String,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024 // 2MB
}

impl Default for HttpTriggerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            path: default_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl HttpTriggerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the route path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the maximum body size.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChordError::Config`] for an empty address or a path that
    /// does not start with '/'.
    pub fn validate(&self) -> Result<(), ChordError> {
        if self.address.trim().is_empty() {
            return Err(ChordError::config("address must not be empty"));
        }
        if !self.path.starts_with('/') {
            return Err(ChordError::config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sub_millisecond_period_rounds_up() {
        let config = TimerConfig::default().with_period(Duration::from_micros(250));
        assert_eq!(config.period_ms, 1);
        assert_eq!(
            TimerConfig::default()
                .with_period(Duration::from_micros(1_500))
                .period_ms,
            2
        );
        assert_eq!(TimerConfig::default().with_period(Duration::ZERO).period_ms, 0);
        assert!(crate::triggers::TimerTrigger::from_config(&config).is_ok());
    }

    #[test]
    fn test_timer_config_defaults() {
        let config: TimerConfig = serde_json::from_value(json!({})).expect("valid config");
        assert_eq!(config.period(), Duration::from_secs(1));

        let config = TimerConfig::default().with_period(Duration::from_millis(250));
        assert_eq!(config.period_ms, 250);
    }

    #[test]
    fn test_http_config_defaults_and_overrides() {
        let config: HttpTriggerConfig =
            serde_json::from_value(json!({"path": "/hooks"})).expect("valid config");

        assert_eq!(config.address, "127.0.0.1:8080");
        assert_eq!(config.path, "/hooks");
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_config_rejects_relative_path() {
        let config = HttpTriggerConfig::new().with_path("hooks");
        let err = config.validate().expect_err("relative path is invalid");
        assert!(err.to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_http_config_rejects_empty_address() {
        let config = HttpTriggerConfig::new().with_address(" ");
        assert!(matches!(config.validate(), Err(ChordError::Config(_))));
    }
}
