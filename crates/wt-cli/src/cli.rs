//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Web time tracker.
///
/// Tracks time spent per site from browser activity signals and delivers
/// five-minute activity windows to a collector.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracker. Host events are read as JSON lines from stdin.
    Run,

    /// Log in to the collector.
    ///
    /// The password is read from `WT_PASSWORD` or from the first line of stdin.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,
    },

    /// Log out and forget stored tokens.
    Logout,

    /// Show tracker and login state.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show daily statistics.
    Stats {
        /// Day to show (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_stats_date() {
        let cli = Cli::try_parse_from(["wt", "stats", "--date", "2025-01-02", "--json"]).unwrap();
        match cli.command {
            Some(Commands::Stats { date, json }) => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 1, 2));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["wt", "status", "--verbose", "--config", "x.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
