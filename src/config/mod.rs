//! Configuration for the sidecar supervisor.
//!
//! Values resolve in this order, later sources winning: built-in defaults,
//! the optional TOML settings file, environment variables. The binary
//! applies CLI flags on top of the result.

mod heartbeat;
pub(crate) mod helpers;
mod sidecar;
mod supervisor;

use std::path::Path;

pub use heartbeat::HeartbeatConfig;
pub use helpers::{inject_env_if_absent, injected_env};
pub use supervisor::SupervisorConfig;

use crate::error::ConfigError;
use crate::settings::Settings;
use crate::sidecar::SidecarOptions;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub supervisor: SupervisorConfig,
    pub sidecar: SidecarOptions,
}

impl Config {
    /// Resolve from the default settings file and the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_settings(&Settings::load())
    }

    /// Resolve from an explicit settings file (or the default one) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_settings(&Settings::load_from(path)?),
            None => Self::from_env(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut sidecar = sidecar::resolve_options(settings)?;
        sidecar.heartbeat = HeartbeatConfig::resolve(settings)?;

        Ok(Self {
            supervisor: SupervisorConfig::resolve(settings)?,
            sidecar,
        })
    }
}
