use crate::config::helpers::{optional_env, parse_bool_env, parse_env};
use crate::error::ConfigError;
use crate::settings::Settings;
use crate::sidecar::{AppProtocol, SidecarOptions};

/// Resolve sidecar options: settings file first, env vars on top.
///
/// The heartbeat part is left at the settings value; `Config::from_settings`
/// fills it from [`crate::config::HeartbeatConfig::resolve`].
pub(crate) fn resolve_options(settings: &Settings) -> Result<SidecarOptions, ConfigError> {
    let base = settings.sidecar.clone();

    let app_protocol = match optional_env("SIDECAR_APP_PROTOCOL")? {
        Some(raw) => raw
            .parse::<AppProtocol>()
            .map_err(|message| ConfigError::InvalidValue {
                key: "SIDECAR_APP_PROTOCOL".to_string(),
                message,
            })?,
        None => base.app_protocol,
    };

    let mut pass_through = base.pass_through.clone();
    if let Some(level) = optional_env("SIDECAR_LOG_LEVEL")? {
        pass_through.log_level = Some(level);
    }
    if let Some(path) = optional_env("SIDECAR_CONFIG_FILE")? {
        pass_through.config_file = Some(path.into());
    }
    if let Some(path) = optional_env("SIDECAR_COMPONENTS_PATH")? {
        pass_through.components_path = Some(path.into());
    }

    Ok(SidecarOptions {
        app_id: optional_env("SIDECAR_APP_ID")?.unwrap_or(base.app_id),
        app_id_suffix: optional_env("SIDECAR_APP_ID_SUFFIX")?.or(base.app_id_suffix),
        app_id_delimiter: base.app_id_delimiter,
        app_port: parse_env("SIDECAR_APP_PORT")?.or(base.app_port),
        app_protocol,
        app_ssl: parse_bool_env("SIDECAR_APP_SSL", base.app_ssl)?,
        http_port: parse_env("SIDECAR_LISTEN_HTTP_PORT")?.or(base.http_port),
        grpc_port: parse_env("SIDECAR_LISTEN_GRPC_PORT")?.or(base.grpc_port),
        visible: parse_bool_env("SIDECAR_VISIBLE", base.visible)?,
        heartbeat: base.heartbeat,
        pass_through,
    })
}
