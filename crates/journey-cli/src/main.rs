use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use journey_cli::commands::track::Report;
use journey_cli::commands::{status, track};
use journey_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let report = match cli.command {
        Some(Commands::Status { json }) => {
            let config = load_config(cli.config.as_deref())?;
            return status::run(&mut std::io::stdout().lock(), &config, json).await;
        }
        Some(Commands::Start) => Report::Start,
        Some(Commands::Event { name, collapsible }) => Report::Event { name, collapsible },
        Some(Commands::Error { name }) => Report::Error { name },
        Some(Commands::Crash { name }) => Report::Crash { name },
        Some(Commands::Stage { stage, name }) => Report::Stage { stage, name },
        Some(Commands::Flush) => Report::Flush,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let config = load_config(cli.config.as_deref())?;
    track::run(&config, &report).await
}
