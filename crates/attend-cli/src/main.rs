use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use attend_cli::commands::{apply, segments, serve, sessions, status};
use attend_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Ok(config)
}

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(attend_db::Database, Config)> {
    let config = load_config(config_path)?;
    let db = attend_db::Database::open_with_timeout(&config.database_path, config.busy_timeout())
        .context("failed to open database")?;
    Ok((db, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout();

    match &cli.command {
        Some(Commands::Serve { listen }) => {
            let config = load_config(cli.config.as_deref())?;
            serve::run(&config, listen.as_deref()).await?;
        }
        Some(Commands::Apply(args)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            apply::run(&mut stdout, &mut db, args, chrono::Utc::now())?;
        }
        Some(Commands::Segments { session, json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            segments::run(&mut stdout, &db, session, *json)?;
        }
        Some(Commands::Sessions { limit }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            sessions::run(&mut stdout, &db, *limit)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config.database_path)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
