//! Demo command - manage demo mode

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::load_settings;

#[derive(Subcommand)]
pub enum DemoCommands {
    /// Enable demo mode
    #[command(name = "on")]
    On,
    /// Disable demo mode
    #[command(name = "off")]
    Off,
    /// Show demo mode status
    Status,
}

pub fn run(command: Option<DemoCommands>) -> Result<()> {
    let (app_dir, mut settings) = load_settings()?;

    match command {
        Some(DemoCommands::On) => {
            settings.enable_demo_mode();
            settings.save(&app_dir)?;
            println!("{}", "Demo mode enabled".green());
            println!("Extractions now read a generated ledger. Try 'franja extract --date <YYYY-MM-DD>'.");
            Ok(())
        }
        Some(DemoCommands::Off) => {
            settings.disable_demo_mode();
            settings.save(&app_dir)?;
            println!("{}", "Demo mode disabled".yellow());
            Ok(())
        }
        Some(DemoCommands::Status) | None => {
            if settings.demo_mode {
                println!("Demo mode is {}", "ON".green());
            } else {
                println!("Demo mode is {}", "OFF".yellow());
            }
            Ok(())
        }
    }
}
