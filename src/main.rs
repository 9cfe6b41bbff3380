//! sws - Stan WASM build server core
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use sws::cli::{Cli, Commands};
use sws::config::ConfigManager;
use sws::error::SwsResult;
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

async fn run() -> SwsResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions(args) = cli.command {
        sws::cli::commands::completions(args);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("sws=warn"),
        1 => EnvFilter::new("sws=info"),
        _ => EnvFilter::new("sws=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    // Config commands must work even when storage is unwritable
    if !matches!(cli.command, Commands::Config(_)) {
        ConfigManager::ensure_storage_dirs(&config).await?;
    }

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Config(args) => sws::cli::commands::config(args, &config_manager, &config).await,
        Commands::Job(args) => sws::cli::commands::job(args, &config).await,
        Commands::Build(args) => sws::cli::commands::build(args, &config).await,
        Commands::Cache(args) => sws::cli::commands::cache(args, &config).await,
    }
}
