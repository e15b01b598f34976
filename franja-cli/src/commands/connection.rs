//! Test command - check the saved connection

use anyhow::Result;
use colored::Colorize;

use super::{get_logger, get_session, log_event};
use franja_core::services::logging::CONNECTION_TESTED;
use franja_core::{Error, LogEvent};

pub fn run(json: bool) -> Result<()> {
    let logger = get_logger();
    let session = get_session()?;

    if !session.is_configured()? {
        let err = Error::NotConfigured;
        log_event(&logger, LogEvent::new(CONNECTION_TESTED).with_command("test").with_error(&err));
        anyhow::bail!("{}. Run 'franja configure' first.", err);
    }

    let config = session.connection()?;
    let result = session.test_connection(&config);

    let mut event = LogEvent::new(CONNECTION_TESTED).with_command("test");
    if !result.ok {
        event.error_kind = Some("connection".to_string());
        event.error_message = Some(result.message.clone());
    }
    log_event(&logger, event);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let target = format!("{}@{}:{}/{}", config.username, config.host, config.port, config.database);
    if result.ok {
        println!("{} {}", "OK".green().bold(), target);
        println!("  {}", result.message);
    } else {
        println!("{} {}", "FAILED".red().bold(), target);
        println!("  {}", result.message);
    }
    Ok(())
}
