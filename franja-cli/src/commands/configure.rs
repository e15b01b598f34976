//! Configure command - save the source database connection

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use dialoguer::{Confirm, Input, Password};

use super::{get_logger, get_session, log_event};
use franja_core::domain::{DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
use franja_core::services::logging::CONFIG_SAVED;
use franja_core::{ConnectionConfig, LogEvent};

#[derive(Args)]
pub struct ConfigureArgs {
    /// Database host
    #[arg(long)]
    pub host: Option<String>,
    /// Database port
    #[arg(long)]
    pub port: Option<u16>,
    /// Database name
    #[arg(long)]
    pub database: Option<String>,
    /// Database user
    #[arg(long)]
    pub username: Option<String>,
    /// Database password (prompted when omitted)
    #[arg(long, env = "FRANJA_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Maximum pooled connections
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: u32,
    /// Connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
    /// Save without testing the connection first
    #[arg(long)]
    pub skip_test: bool,
    /// Forget the saved connection instead
    #[arg(long, conflicts_with_all = ["host", "database", "username", "password"])]
    pub clear: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

fn prompt_text(value: Option<String>, prompt: &str, default: Option<String>) -> Result<String> {
    if let Some(v) = value {
        return Ok(v.trim().to_string());
    }
    let mut input = Input::<String>::new().with_prompt(prompt);
    if let Some(d) = default {
        input = input.default(d);
    }
    Ok(input.interact_text()?.trim().to_string())
}

/// Fill missing fields from prompts, offering the saved values as defaults
fn collect(args: &ConfigureArgs, saved: Option<&ConnectionConfig>) -> Result<ConnectionConfig> {
    let host = prompt_text(args.host.clone(), "Host", saved.map(|c| c.host.clone()))?;
    let port = match args.port {
        Some(port) => port,
        None => Input::<u16>::new()
            .with_prompt("Port")
            .default(saved.map(|c| c.port).unwrap_or(DEFAULT_PORT))
            .interact_text()?,
    };
    let database = prompt_text(args.database.clone(), "Database", saved.map(|c| c.database.clone()))?;
    let username = prompt_text(args.username.clone(), "Username", saved.map(|c| c.username.clone()))?;
    let password = match &args.password {
        Some(p) => p.clone(),
        None => Password::new().with_prompt("Password").interact()?,
    };

    Ok(ConnectionConfig::new(host, port, database, username, password)
        .with_pool_size(args.pool_size)
        .with_timeout_secs(args.timeout))
}

pub fn run(args: ConfigureArgs) -> Result<()> {
    let logger = get_logger();
    let session = get_session()?;

    if args.clear {
        let removed = session.clear_configuration()?;
        if args.json {
            println!("{}", serde_json::json!({ "cleared": removed }));
        } else if removed {
            println!("{}", "Saved connection removed".yellow());
        } else {
            println!("No connection was saved.");
        }
        return Ok(());
    }

    if session.is_demo() {
        println!("Demo mode uses a built-in ledger. Run 'franja demo off' to configure a real database.");
        return Ok(());
    }

    let saved = if session.is_configured()? {
        session.connection().ok()
    } else {
        None
    };
    let config = collect(&args, saved.as_ref())?;
    config.validate()?;

    if !args.skip_test {
        let result = session.test_connection(&config);
        if !result.ok {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                anyhow::bail!("Connection test failed");
            }
            println!("{} {}", "Connection failed:".red(), result.message);
            let save_anyway = Confirm::new()
                .with_prompt("Save this configuration anyway?")
                .default(false)
                .interact()?;
            if !save_anyway {
                println!("Not saved.");
                return Ok(());
            }
        } else if !args.json {
            println!("{} {}", "Connected.".green(), result.message);
        }
    }

    if let Err(e) = session.configure(&config) {
        log_event(&logger, LogEvent::new(CONFIG_SAVED).with_command("configure").with_error(&e));
        return Err(e.into());
    }
    log_event(&logger, LogEvent::new(CONFIG_SAVED).with_command("configure"));

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "saved": true,
                "host": config.host,
                "port": config.port,
                "database": config.database,
                "username": config.username,
            })
        );
    } else {
        println!(
            "{} {}@{}:{}/{}",
            "Saved connection".green(),
            config.username,
            config.host,
            config.port,
            config.database
        );
    }

    Ok(())
}
