use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::helpers::{parse_bool_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Heartbeat configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether the supervisor re-checks the sidecar periodically.
    pub enabled: bool,
    /// Interval between heartbeat checks in seconds.
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
        }
    }
}

impl HeartbeatConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let config = Self {
            enabled: parse_bool_env("HEARTBEAT_ENABLED", settings.heartbeat.enabled)?,
            interval_secs: parse_optional_env(
                "HEARTBEAT_INTERVAL_SECS",
                settings.heartbeat.interval_secs,
            )?,
        };

        if config.enabled && config.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HEARTBEAT_INTERVAL_SECS".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        Ok(config)
    }

    /// Interval between checks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Disable the heartbeat.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Use a specific interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs().max(1);
        self
    }
}
