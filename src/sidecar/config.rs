//! Sidecar options and their normalized runtime form.
//!
//! [`SidecarOptions`] is what callers hand to the supervisor. It is loose:
//! the app port may come from the environment, the app id may carry a
//! suffix, the sidecar ports may be left for the sidecar to pick.
//! [`SidecarOptions::normalize`] turns it into a [`RuntimeConfig`], the only
//! shape the supervisor works with.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::HeartbeatConfig;
use crate::config::helpers::parse_env;
use crate::error::ConfigError;

/// Env var consulted when no app port is configured explicitly.
pub const APP_PORT_ENV: &str = "APP_PORT";

/// Default delimiter between the base app id and its suffix.
pub const DEFAULT_APP_ID_DELIMITER: &str = "-";

/// Protocol the application speaks to its sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    #[default]
    Http,
    Https,
    Grpc,
    Grpcs,
    H2c,
}

impl AppProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppProtocol::Http => "http",
            AppProtocol::Https => "https",
            AppProtocol::Grpc => "grpc",
            AppProtocol::Grpcs => "grpcs",
            AppProtocol::H2c => "h2c",
        }
    }
}

impl fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(AppProtocol::Http),
            "https" => Ok(AppProtocol::Https),
            "grpc" => Ok(AppProtocol::Grpc),
            "grpcs" => Ok(AppProtocol::Grpcs),
            "h2c" => Ok(AppProtocol::H2c),
            other => Err(format!(
                "unknown protocol '{other}' (expected http, https, grpc, grpcs or h2c)"
            )),
        }
    }
}

/// Settings passed through to the sidecar untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassThroughOptions {
    /// Sidecar configuration file.
    pub config_file: Option<PathBuf>,
    /// Directory holding component definitions.
    pub components_path: Option<PathBuf>,
    /// Sidecar log level (`debug`, `info`, ...).
    pub log_level: Option<String>,
    /// Sidecar image override.
    pub image: Option<String>,
    /// Maximum concurrent requests forwarded to the app.
    pub max_concurrency: Option<u32>,
    /// Expose the profiling endpoint.
    pub enable_profiling: bool,
    pub placement_host_address: Option<String>,
    pub sentry_address: Option<String>,
    pub metrics_port: Option<u16>,
    pub profile_port: Option<u16>,
    /// Unix domain socket directory for app/sidecar traffic.
    pub unix_domain_socket: Option<PathBuf>,
    /// Maximum request body size in MB.
    pub max_request_size_mb: Option<u32>,
}

/// User-supplied sidecar options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarOptions {
    /// Base application id.
    pub app_id: String,
    /// Optional suffix appended to the app id (e.g. a deployment slot).
    pub app_id_suffix: Option<String>,
    /// Delimiter placed between app id and suffix.
    pub app_id_delimiter: String,
    /// Port the application listens on. Falls back to `APP_PORT`.
    pub app_port: Option<u16>,
    pub app_protocol: AppProtocol,
    /// Whether the app endpoint uses TLS.
    pub app_ssl: bool,
    /// Sidecar HTTP port. Left unset, the sidecar picks one.
    pub http_port: Option<u16>,
    /// Sidecar gRPC port. Left unset, the sidecar picks one.
    pub grpc_port: Option<u16>,
    /// Show the sidecar's console window (Windows only).
    pub visible: bool,
    /// Heartbeat settings; resolved separately from the `[heartbeat]` table.
    #[serde(skip)]
    pub heartbeat: HeartbeatConfig,
    #[serde(flatten)]
    pub pass_through: PassThroughOptions,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_id_suffix: None,
            app_id_delimiter: DEFAULT_APP_ID_DELIMITER.to_string(),
            app_port: None,
            app_protocol: AppProtocol::default(),
            app_ssl: false,
            http_port: None,
            grpc_port: None,
            visible: false,
            heartbeat: HeartbeatConfig::default(),
            pass_through: PassThroughOptions::default(),
        }
    }
}

impl SidecarOptions {
    /// Create options for an app id and port with everything else defaulted.
    pub fn new(app_id: impl Into<String>, app_port: u16) -> Self {
        Self {
            app_id: app_id.into(),
            app_port: Some(app_port),
            ..Default::default()
        }
    }

    /// Derive the canonical runtime configuration.
    ///
    /// Fails when no app id is set, or when the app port cannot be resolved
    /// from the options or from `APP_PORT`.
    pub fn normalize(&self) -> Result<RuntimeConfig, ConfigError> {
        let fallback = if self.app_port.is_none() {
            parse_env::<u16>(APP_PORT_ENV)?
        } else {
            None
        };
        self.normalize_with_fallback(fallback)
    }

    fn normalize_with_fallback(
        &self,
        fallback_port: Option<u16>,
    ) -> Result<RuntimeConfig, ConfigError> {
        let base = self.app_id.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "app_id".to_string(),
                hint: "Set SIDECAR_APP_ID or pass --app-id".to_string(),
            });
        }

        let app_port = match self.app_port.or(fallback_port) {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "app_port".to_string(),
                    message: "must be between 1 and 65535".to_string(),
                });
            }
            Some(port) => port,
            None => {
                return Err(ConfigError::MissingRequired {
                    key: "app_port".to_string(),
                    hint: format!("Set SIDECAR_APP_PORT or {APP_PORT_ENV}, or pass --app-port"),
                });
            }
        };

        for (key, port) in [("http_port", self.http_port), ("grpc_port", self.grpc_port)] {
            if port == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be between 1 and 65535 (leave unset to let the sidecar pick)"
                        .to_string(),
                });
            }
        }

        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "heartbeat.interval_secs".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        Ok(RuntimeConfig {
            app_id: compose_app_id(
                base,
                self.app_id_suffix.as_deref(),
                &self.app_id_delimiter,
            ),
            app_port,
            app_protocol: self.app_protocol,
            app_ssl: self.app_ssl,
            http_port: self.http_port,
            grpc_port: self.grpc_port,
            heartbeat: self.heartbeat.clone(),
            visible: self.visible,
            pass_through: self.pass_through.clone(),
        })
    }
}

/// Join a base app id and an optional suffix.
///
/// A missing or whitespace-only suffix leaves the base id unchanged.
pub fn compose_app_id(base: &str, suffix: Option<&str>, delimiter: &str) -> String {
    match suffix.map(str::trim) {
        Some(suffix) if !suffix.is_empty() => format!("{base}{delimiter}{suffix}"),
        _ => base.to_string(),
    }
}

/// Normalized sidecar configuration.
///
/// Immutable once a launch begins, except for the sidecar ports, which the
/// supervisor backfills on the applied configuration once the sidecar
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub app_id: String,
    pub app_port: u16,
    pub app_protocol: AppProtocol,
    pub app_ssl: bool,
    pub http_port: Option<u16>,
    pub grpc_port: Option<u16>,
    pub heartbeat: HeartbeatConfig,
    pub visible: bool,
    pub pass_through: PassThroughOptions,
}

impl RuntimeConfig {
    /// Both sidecar ports are known.
    pub fn ports_complete(&self) -> bool {
        self.http_port.is_some() && self.grpc_port.is_some()
    }

    /// Explicitly declared sidecar ports, HTTP first.
    pub fn declared_ports(&self) -> Vec<u16> {
        [self.http_port, self.grpc_port]
            .into_iter()
            .flatten()
            .collect()
    }
}
