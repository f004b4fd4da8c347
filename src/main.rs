use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use roster::cli::{Cli, Commands, commands};
use roster::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data) = cli.data {
        config.data_file = Some(data);
    }

    // Initialize logger to file (truncate on each run)
    let level: LevelFilter = config
        .log_level
        .parse()
        .with_context(|| format!("Invalid log_level '{}' in config", config.log_level))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&config.log_file)
        .with_context(|| format!("Failed to open log file: {:?}", config.log_file))?;
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    info!("Starting roster");

    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Tui => commands::tui_command(&config).await?,
        Commands::List { filter } => commands::list_command(&config, filter).await?,
        Commands::Export { path } => commands::export_command(&config, path).await?,
        Commands::Add(args) => commands::add_command(&config, args).await?,
    }

    log::logger().flush();
    Ok(())
}
