//! Command-line assembly for the sidecar launch.

use std::fmt::Display;

use crate::sidecar::config::RuntimeConfig;

/// Collects `--flag value` pairs into a flat argument list.
///
/// Flags without a value are skipped entirely rather than emitted empty.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    prefix: String,
    args: Vec<String>,
}

impl CommandBuilder {
    /// Create a builder rendering flags with `prefix` (usually `--`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            args: Vec::new(),
        }
    }

    /// Append a bare positional argument (a subcommand).
    pub fn positional(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.args.push(value);
        }
        self
    }

    /// Append `flag value` unless the value is absent or `skip_if` holds.
    pub fn add<T: Display>(mut self, flag: &str, value: Option<T>, skip_if: bool) -> Self {
        if skip_if {
            return self;
        }
        if let Some(value) = value {
            let value = value.to_string();
            if !value.is_empty() {
                self.args.push(format!("{}{}", self.prefix, flag));
                self.args.push(value);
            }
        }
        self
    }

    /// Append a bare `flag` when `enabled`.
    pub fn add_switch(mut self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.args.push(format!("{}{}", self.prefix, flag));
        }
        self
    }

    /// The flat argument list.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }

    /// Render as a single command-line string, quoting values with spaces.
    pub fn render(&self) -> String {
        self.args
            .iter()
            .map(|arg| {
                if arg.chars().any(char::is_whitespace) {
                    format!("\"{}\"", arg.replace('"', "\\\""))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the launch arguments for a normalized configuration.
pub fn build_launch_args(config: &RuntimeConfig, run_command: &str, prefix: &str) -> CommandBuilder {
    let extra = &config.pass_through;

    CommandBuilder::new(prefix)
        .positional(run_command)
        .add("app-id", Some(&config.app_id), false)
        .add("app-port", Some(config.app_port), false)
        .add("app-protocol", Some(config.app_protocol), false)
        .add_switch("app-ssl", config.app_ssl)
        .add("dapr-http-port", config.http_port, false)
        .add("dapr-grpc-port", config.grpc_port, false)
        .add("config", extra.config_file.as_ref().map(|p| p.display()), false)
        .add(
            "resources-path",
            extra.components_path.as_ref().map(|p| p.display()),
            false,
        )
        .add("log-level", extra.log_level.as_deref(), false)
        .add("image", extra.image.as_deref(), false)
        .add("app-max-concurrency", extra.max_concurrency, false)
        .add_switch("enable-profiling", extra.enable_profiling)
        .add(
            "placement-host-address",
            extra.placement_host_address.as_deref(),
            false,
        )
        .add("sentry-address", extra.sentry_address.as_deref(), false)
        .add("metrics-port", extra.metrics_port, false)
        .add(
            "profile-port",
            extra.profile_port,
            !extra.enable_profiling,
        )
        .add(
            "unix-domain-socket",
            extra.unix_domain_socket.as_ref().map(|p| p.display()),
            false,
        )
        .add(
            "dapr-http-max-request-size",
            extra.max_request_size_mb,
            false,
        )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sidecar::config::SidecarOptions;

    #[test]
    fn test_absent_values_are_skipped() {
        let builder = CommandBuilder::new("--")
            .add("present", Some("yes"), false)
            .add::<&str>("absent", None, false)
            .add("skipped", Some(1), true)
            .add("empty", Some(""), false);

        assert_eq!(builder.args(), ["--present", "yes"]);
    }

    #[test]
    fn test_render_quotes_whitespace() {
        let builder = CommandBuilder::new("-")
            .positional("run")
            .add("config", Some("/etc/my app/config.yaml"), false)
            .add_switch("verbose", true)
            .add_switch("quiet", false);

        assert_eq!(
            builder.render(),
            "run -config \"/etc/my app/config.yaml\" -verbose"
        );
    }

    #[test]
    fn test_launch_args_minimal() {
        let config = SidecarOptions::new("orders", 5000).normalize().unwrap();
        let args = build_launch_args(&config, "run", "--").into_args();

        assert_eq!(
            args,
            [
                "run",
                "--app-id",
                "orders",
                "--app-port",
                "5000",
                "--app-protocol",
                "http",
            ]
        );
    }

    #[test]
    fn test_launch_args_full() {
        let mut options = SidecarOptions {
            http_port: Some(3500),
            grpc_port: Some(50001),
            app_ssl: true,
            ..SidecarOptions::new("orders", 5000)
        };
        options.pass_through.log_level = Some("debug".to_string());
        options.pass_through.profile_port = Some(7777);
        options.pass_through.max_request_size_mb = Some(16);

        let config = options.normalize().unwrap();
        let rendered = build_launch_args(&config, "run", "--").render();

        assert!(rendered.contains("--app-ssl"));
        assert!(rendered.contains("--dapr-http-port 3500"));
        assert!(rendered.contains("--dapr-grpc-port 50001"));
        assert!(rendered.contains("--log-level debug"));
        assert!(rendered.contains("--dapr-http-max-request-size 16"));
        // Profile port only matters with profiling enabled.
        assert!(!rendered.contains("--profile-port"));
    }
}
