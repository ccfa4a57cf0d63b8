//! Sidecar supervisor - Main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sidecar_supervisor::{
    cli::{Cli, Command, SHUTDOWN_TIMEOUT, run_args_command, run_list_command},
    config::Config,
    sidecar::{Collaborators, ConsoleSink, SidecarManager},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sidecar_supervisor=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Command::List { sidecar, json }) => {
            sidecar.apply(&mut config);
            run_list_command(&config, json).await
        }
        Some(Command::Args(sidecar)) => {
            sidecar.apply(&mut config);
            run_args_command(&config)
        }
        Some(Command::Run(sidecar)) => {
            sidecar.apply(&mut config);
            run(config).await
        }
        None => run(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let mut collaborators = Collaborators::system(&config.supervisor);
    collaborators.output = Arc::new(ConsoleSink::new());
    let manager = SidecarManager::with_collaborators(config.supervisor.clone(), collaborators);

    manager.start(&config.sidecar).await?;
    if let Some(pid) = manager.process_id().await {
        tracing::info!("Supervising sidecar pid {} (Ctrl-C to stop)", pid);
    }

    let mut status = manager.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            tracing::info!("Sidecar status: {}", current);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down sidecar...");

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.dispose())
        .await
        .is_err()
    {
        tracing::warn!("Sidecar shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
    }
    Ok(())
}
