use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use apphost::config::{self, AppConfig};
use apphost::host::{ApplicationHost, HeartbeatProcess};
use apphost::logging;

/// Host a process with the configured application logger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (default: ~/.apphost/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instance name reported with performance counters
    #[arg(long)]
    instance: Option<String>,

    /// Start the hosted process immediately
    #[arg(long)]
    autostart: bool,

    /// Arguments passed to the hosted process
    #[arg(trailing_var_arg = true)]
    process_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut app_config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(instance) = args.instance {
        app_config.logger.instance_name = instance;
    }
    if args.autostart {
        app_config.host.autostart = true;
    }

    // Initialize diagnostics BEFORE any tracing calls
    let guard = logging::init_diagnostics(&app_config.diagnostics)?;

    if let Some(dir) = &app_config.diagnostics.log_dir {
        match logging::cleanup_old_diagnostics(dir, app_config.diagnostics.retention_days) {
            Ok(count) if count > 0 => tracing::info!("Cleaned up {} old diagnostics files", count),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to clean up diagnostics files: {:#}", e),
        }
    }
    match guard.path() {
        Some(path) => tracing::info!("Diagnostics to: {}", path.display()),
        None => tracing::debug!("Diagnostics to stderr, config dir: {}", config::config_dir().display()),
    }

    let mut process = HeartbeatProcess::new(
        app_config.host.service_name.clone(),
        Duration::from_secs(app_config.host.heartbeat_interval_secs),
    );
    let mut host = ApplicationHost::new(app_config).with_args(args.process_args);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    host.run(&mut process, shutdown)
        .await
        .context("Application host terminated with an error")
}
