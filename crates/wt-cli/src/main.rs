use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{login, logout, stats, status};
use wt_cli::{Cli, Commands, Config, daemon};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout belongs to command output, so logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = io::stdout();
    match &cli.command {
        Some(Commands::Run) => {
            daemon::run(&config).await?;
        }
        Some(Commands::Login { email }) => {
            let password =
                login::read_password(std::env::var(login::PASSWORD_ENV).ok(), io::stdin().lock())?;
            login::run(&mut stdout, &config, email, password).await?;
        }
        Some(Commands::Logout) => {
            logout::run(&mut stdout, &config).await?;
        }
        Some(Commands::Status { json }) => {
            status::run(&mut stdout, &config, *json)?;
        }
        Some(Commands::Stats { date, json }) => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            stats::run(&mut stdout, &config, date, *json)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
        }
    }

    stdout.flush()?;
    Ok(())
}
