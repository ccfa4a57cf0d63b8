//! CLI command handling.
//!
//! Provides subcommands for:
//! - Supervising the sidecar until Ctrl-C (`run`)
//! - Showing the running instances of the configured app id (`list`)
//! - Printing the launch command line without running it (`args`)

use std::path::PathBuf;
use std::time::Duration;

use clap::{ColorChoice, Parser, Subcommand};

use crate::config::Config;
use crate::sidecar::{AppProtocol, CliInventory, Inventory, build_launch_args};

#[derive(Parser, Debug)]
#[command(name = "sidecar-supervisor")]
#[command(about = "Launch and supervise a local application sidecar")]
#[command(
    long_about = "Runs the sidecar CLI next to your application and keeps it alive.\nExamples:\n  sidecar-supervisor run --app-id orders --app-port 5000\n  sidecar-supervisor args --app-id orders --app-port 5000"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Settings file path (defaults to ~/.sidecar-supervisor/settings.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the sidecar and supervise it until Ctrl-C (default)
    Run(SidecarArgs),

    /// List running instances of the configured app id
    List {
        #[command(flatten)]
        sidecar: SidecarArgs,

        /// Print instances as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the sidecar launch command without running it
    Args(SidecarArgs),
}

/// Per-invocation overrides, applied on top of settings and environment.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SidecarArgs {
    /// Base application id
    #[arg(long)]
    pub app_id: Option<String>,

    /// Suffix appended to the app id
    #[arg(long)]
    pub app_id_suffix: Option<String>,

    /// Port the application listens on
    #[arg(long)]
    pub app_port: Option<u16>,

    /// Protocol the application speaks (http, https, grpc, grpcs, h2c)
    #[arg(long)]
    pub app_protocol: Option<AppProtocol>,

    /// Sidecar HTTP port (picked by the sidecar when unset)
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Sidecar gRPC port (picked by the sidecar when unset)
    #[arg(long)]
    pub grpc_port: Option<u16>,

    /// Sidecar log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Sidecar CLI executable
    #[arg(long)]
    pub executable: Option<String>,

    /// Tell the sidecar the application uses TLS (`--app-ssl false` turns it off)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub app_ssl: Option<bool>,

    /// Show the sidecar in its own console window (Windows)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub visible: Option<bool>,

    /// Disable the heartbeat restart loop
    #[arg(long)]
    pub no_heartbeat: bool,
}

impl SidecarArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut Config) {
        let sidecar = &mut config.sidecar;
        if let Some(app_id) = &self.app_id {
            sidecar.app_id = app_id.clone();
        }
        if let Some(suffix) = &self.app_id_suffix {
            sidecar.app_id_suffix = Some(suffix.clone());
        }
        if self.app_port.is_some() {
            sidecar.app_port = self.app_port;
        }
        if let Some(protocol) = self.app_protocol {
            sidecar.app_protocol = protocol;
        }
        if self.http_port.is_some() {
            sidecar.http_port = self.http_port;
        }
        if self.grpc_port.is_some() {
            sidecar.grpc_port = self.grpc_port;
        }
        if let Some(level) = &self.log_level {
            sidecar.pass_through.log_level = Some(level.clone());
        }
        if let Some(app_ssl) = self.app_ssl {
            sidecar.app_ssl = app_ssl;
        }
        if let Some(visible) = self.visible {
            sidecar.visible = visible;
        }
        if self.no_heartbeat {
            sidecar.heartbeat.enabled = false;
        }
        if let Some(executable) = &self.executable {
            config.supervisor.executable = executable.clone();
        }
    }
}

/// Print the running instances of the configured app id.
pub async fn run_list_command(config: &Config, json: bool) -> anyhow::Result<()> {
    let runtime = config.sidecar.normalize()?;
    let inventory = CliInventory::new(
        config.supervisor.executable.clone(),
        config.supervisor.inventory_timeout(),
    );
    let instances = inventory.list(&runtime.app_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!("No running instances of {}", runtime.app_id);
        return Ok(());
    }

    println!("{:<24} {:>8} {:>8} {:>8}", "APP ID", "PID", "HTTP", "GRPC");
    for instance in instances {
        println!(
            "{:<24} {:>8} {:>8} {:>8}",
            instance.app_id,
            instance.pid,
            port_label(instance.http_port),
            port_label(instance.grpc_port)
        );
    }
    Ok(())
}

fn port_label(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Print the command line `run` would launch.
pub fn run_args_command(config: &Config) -> anyhow::Result<()> {
    let runtime = config.sidecar.normalize()?;
    let command = build_launch_args(
        &runtime,
        &config.supervisor.run_command,
        &config.supervisor.flag_prefix,
    );
    println!("{} {}", config.supervisor.executable, command.render());
    Ok(())
}

/// Grace period the binary allows `dispose` on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
