use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// How the supervisor drives the sidecar executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Sidecar CLI executable (name on PATH or absolute path).
    pub executable: String,
    /// Subcommand that launches a sidecar (`dapr run ...`). Empty for none.
    pub run_command: String,
    /// Prefix rendered in front of every flag name.
    pub flag_prefix: String,
    /// Seconds to wait for the tracked process after each stop signal.
    pub stop_grace_secs: u64,
    /// Inventory polls made when the sidecar's ports are still unknown.
    pub port_poll_attempts: u32,
    /// Delay between those polls, in milliseconds.
    pub port_poll_delay_ms: u64,
    /// Timeout for one inventory command, in seconds.
    pub inventory_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: "dapr".to_string(),
            run_command: "run".to_string(),
            flag_prefix: "--".to_string(),
            stop_grace_secs: 5,
            port_poll_attempts: 3,
            port_poll_delay_ms: 0,
            inventory_timeout_secs: 10,
        }
    }
}

impl SupervisorConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let base = &settings.supervisor;

        let config = Self {
            executable: optional_env("SIDECAR_EXECUTABLE")?
                .unwrap_or_else(|| base.executable.clone()),
            run_command: optional_env("SIDECAR_RUN_COMMAND")?
                .unwrap_or_else(|| base.run_command.clone()),
            flag_prefix: optional_env("SIDECAR_FLAG_PREFIX")?
                .unwrap_or_else(|| base.flag_prefix.clone()),
            stop_grace_secs: parse_optional_env("SIDECAR_STOP_GRACE_SECS", base.stop_grace_secs)?,
            port_poll_attempts: parse_optional_env(
                "SIDECAR_PORT_POLL_ATTEMPTS",
                base.port_poll_attempts,
            )?,
            port_poll_delay_ms: parse_optional_env(
                "SIDECAR_PORT_POLL_DELAY_MS",
                base.port_poll_delay_ms,
            )?,
            inventory_timeout_secs: parse_optional_env(
                "SIDECAR_INVENTORY_TIMEOUT_SECS",
                base.inventory_timeout_secs,
            )?,
        };

        if config.executable.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_EXECUTABLE".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if config.port_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_PORT_POLL_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn port_poll_delay(&self) -> Duration {
        Duration::from_millis(self.port_poll_delay_ms)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_secs)
    }
}
