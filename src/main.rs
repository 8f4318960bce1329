//! Replica - content-addressed snapshot sync
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use replica::cli::{Cli, Commands};
use replica::config::ConfigManager;
use replica::error::ReplicaResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ReplicaResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("replica=warn"),
        1 => EnvFilter::new("replica=info"),
        _ => EnvFilter::new("replica=debug"),
    });

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .without_time()
            .init();
    }
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Hash(args) => replica::cli::commands::hash(args).await,
        Commands::Sync(args) => replica::cli::commands::sync(args, &config).await,
        Commands::Config(args) => {
            replica::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
