//! History command - list recent successful extractions

use anyhow::Result;
use colored::Colorize;

use super::get_session;
use crate::output;

pub fn run(limit: usize, json: bool) -> Result<()> {
    let session = get_session()?;
    let runs = session.history(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No extractions yet. Run 'franja extract --date YYYY-MM-DD' to create one.");
        return Ok(());
    }

    println!("{}", "Recent Extractions".bold());
    let mut table = output::create_table();
    table.set_header(vec!["When", "From", "To", "Invoices", "Counterparties", "Time"]);
    for run in &runs {
        table.add_row(vec![
            run.created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            run.start_date.to_string(),
            run.end_date.to_string(),
            run.invoice_rows.to_string(),
            run.partner_rows.to_string(),
            format!("{:.2}s", run.elapsed_secs),
        ]);
    }
    println!("{}", table);
    Ok(())
}
