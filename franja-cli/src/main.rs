//! Franja CLI - Odoo invoices and counterparties to spreadsheets

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{configure, connection, demo, extract, history, logs, settings};

/// Franja - export accounting data from Odoo to Excel
#[derive(Parser)]
#[command(name = "franja", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the database connection (prompts for missing values)
    Configure(configure::ConfigureArgs),

    /// Test the saved database connection
    Test {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract invoices and counterparties for a day or a date range
    Extract(extract::ExtractArgs),

    /// List recent extractions
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },

    /// Show or change local settings
    Settings {
        #[command(subcommand)]
        command: Option<settings::SettingsCommands>,
    },

    /// Manage demo mode
    Demo {
        #[command(subcommand)]
        command: Option<demo::DemoCommands>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FRANJA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Configure(args) => configure::run(args),
        Commands::Test { json } => connection::run(json),
        Commands::Extract(args) => extract::run(args),
        Commands::History { limit, json } => history::run(limit, json),
        Commands::Logs { command } => logs::run(command),
        Commands::Settings { command } => settings::run(command),
        Commands::Demo { command } => demo::run(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_extract_date_arguments() {
        assert!(Cli::try_parse_from(["franja", "extract", "--date", "2024-01-15"]).is_ok());
        assert!(Cli::try_parse_from(["franja", "extract", "--start", "2024-01-01", "--end", "2024-01-31"]).is_ok());

        // A range needs both ends and cannot be mixed with a single day
        assert!(Cli::try_parse_from(["franja", "extract"]).is_err());
        assert!(Cli::try_parse_from(["franja", "extract", "--start", "2024-01-01"]).is_err());
        assert!(Cli::try_parse_from([
            "franja", "extract", "--date", "2024-01-15", "--start", "2024-01-01", "--end", "2024-01-31",
        ])
        .is_err());
    }

    #[test]
    fn test_configure_clear_conflicts_with_fields() {
        assert!(Cli::try_parse_from(["franja", "configure", "--clear"]).is_ok());
        assert!(Cli::try_parse_from(["franja", "configure", "--clear", "--host", "db"]).is_err());
    }
}
