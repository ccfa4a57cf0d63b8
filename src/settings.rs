//! Optional TOML settings file.
//!
//! ```toml
//! [supervisor]
//! executable = "dapr"
//! stop_grace_secs = 10
//!
//! [sidecar]
//! app_id = "orders"
//! app_port = 5000
//! log_level = "debug"
//!
//! [heartbeat]
//! enabled = true
//! interval_secs = 5
//! ```
//!
//! Every table and key is optional. Environment variables override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{HeartbeatConfig, SupervisorConfig};
use crate::error::ConfigError;
use crate::sidecar::SidecarOptions;

/// Contents of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub supervisor: SupervisorConfig,
    pub sidecar: SidecarOptions,
    pub heartbeat: HeartbeatConfig,
}

impl Settings {
    /// Default settings location: `~/.sidecar-supervisor/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".sidecar-supervisor").join("settings.toml"))
    }

    /// Load the default settings file, or defaults if there is none.
    ///
    /// A file that exists but fails to parse is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", path.display(), e))
        })
    }
}
