//! Settings command - show and change local settings

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};

use super::{get_session, load_settings};

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show settings and the saved connection
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change query and pool limits
    Set {
        /// Longest extraction window in days
        #[arg(long)]
        max_range_days: Option<u32>,
        /// Per-statement timeout in seconds
        #[arg(long)]
        statement_timeout: Option<u64>,
        /// Seconds to wait for a free pooled connection
        #[arg(long)]
        acquire_timeout: Option<u64>,
        /// Accept dates after today
        #[arg(long)]
        allow_future_dates: Option<bool>,
    },
}

pub fn run(command: Option<SettingsCommands>) -> Result<()> {
    match command {
        Some(SettingsCommands::Set {
            max_range_days,
            statement_timeout,
            acquire_timeout,
            allow_future_dates,
        }) => {
            let (app_dir, mut settings) = load_settings()?;
            if let Some(days) = max_range_days {
                settings.query.max_range_days = days;
            }
            if let Some(secs) = statement_timeout {
                settings.query.statement_timeout_secs = secs;
            }
            if let Some(secs) = acquire_timeout {
                settings.pool.acquire_timeout_secs = secs;
            }
            if let Some(allow) = allow_future_dates {
                settings.query.allow_future_dates = allow;
            }
            settings.save(&app_dir)?;
            println!("{}", "Settings saved".green());
            Ok(())
        }
        Some(SettingsCommands::Show { json }) => show(json),
        None => show(false),
    }
}

fn show(json: bool) -> Result<()> {
    let session = get_session()?;
    let settings = session.settings();
    let connection = if session.is_configured()? {
        Some(session.connection()?)
    } else {
        None
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "directory": session.app_dir().to_string_lossy(),
                "demoMode": settings.demo_mode,
                "pool": settings.pool,
                "query": settings.query,
                "connection": connection.as_ref().map(|c| serde_json::json!({
                    "host": c.host,
                    "port": c.port,
                    "database": c.database,
                    "username": c.username,
                    "poolSize": c.pool_size,
                    "timeoutSecs": c.timeout_secs,
                })),
            }))?
        );
        return Ok(());
    }

    println!("{}", "Franja Settings".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec!["Directory".to_string(), session.app_dir().display().to_string()]);
    table.add_row(vec![
        "Demo mode".to_string(),
        if settings.demo_mode { "on" } else { "off" }.to_string(),
    ]);
    table.add_row(vec!["Max range".to_string(), format!("{} days", settings.query.max_range_days)]);
    table.add_row(vec![
        "Future dates".to_string(),
        if settings.query.allow_future_dates { "allowed" } else { "rejected" }.to_string(),
    ]);
    table.add_row(vec![
        "Statement timeout".to_string(),
        format!("{}s", settings.query.statement_timeout_secs),
    ]);
    table.add_row(vec![
        "Pool wait".to_string(),
        format!("{}s", settings.pool.acquire_timeout_secs),
    ]);
    println!("{}", table);
    println!();

    match connection {
        Some(c) => {
            println!("{}", "Connection".bold());
            println!("  {}@{}:{}/{}", c.username, c.host, c.port, c.database);
            println!("  Pool size {}, timeout {}s", c.pool_size, c.timeout_secs);
        }
        None => println!("No connection saved. Run 'franja configure'."),
    }
    Ok(())
}
