use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use release_hook::config::{Config, ConfigSource, DEFAULT_CONFIG};
use release_hook::env::SystemEnv;
use release_hook::serve;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Release publication webhook
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (skips discovery)
    #[arg(short, long, env = "RELEASE_HOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Print the built-in configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", DEFAULT_CONFIG.trim_start());
        return Ok(());
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from));
    let (config, source) = Config::discover(&SystemEnv, args.config.as_deref(), exe_dir.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
        ConfigSource::Builtin { searched } => warn!(
            searched = ?searched,
            "No configuration file found, using built-in defaults"
        ),
    }

    serve(config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Server failed")
}

fn init_tracing(config: &Config) -> Result<()> {
    let default_level = if config.web.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (stdout, file) = match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            (None, Some(layer))
        }
        None => (Some(tracing_subscriber::fmt::layer()), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
    Ok(())
}
