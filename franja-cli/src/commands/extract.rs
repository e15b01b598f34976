//! Extract command - write the invoice and counterparty reports

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::{get_logger, get_session, log_event};
use crate::output;
use franja_core::services::logging::{EXTRACTION_COMPLETED, EXTRACTION_FAILED, EXTRACTION_STARTED};
use franja_core::{
    DateSelector, ErrorKind, ExtractionFailure, ExtractionResult, LogEvent, RunEvent, RunRequest, RunState,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct ExtractArgs {
    /// Single day to extract (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start", "end"], required_unless_present_all = ["start", "end"])]
    pub date: Option<String>,
    /// First day of the range (YYYY-MM-DD)
    #[arg(long, requires = "end")]
    pub start: Option<String>,
    /// Last day of the range (YYYY-MM-DD)
    #[arg(long, requires = "start")]
    pub end: Option<String>,
    /// Folder for the reports (defaults to the desktop)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ExtractArgs {
    fn selector(&self) -> Option<DateSelector> {
        match (&self.date, &self.start, &self.end) {
            (Some(date), _, _) => Some(DateSelector::single(date.as_str())),
            (None, Some(start), Some(end)) => Some(DateSelector::range(start.as_str(), end.as_str())),
            _ => None,
        }
    }
}

fn default_destination() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn phase_label(state: RunState) -> &'static str {
    match state {
        RunState::Idle => "Waiting",
        RunState::Validating => "Validating dates",
        RunState::Connecting => "Connecting to database",
        RunState::Extracting => "Reading invoices and counterparties",
        RunState::Reporting => "Writing reports",
        RunState::Done => "Done",
        RunState::Failed => "Failed",
    }
}

/// Flag set on Ctrl-C, watched from a background thread
fn watch_interrupt() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let watcher = Arc::clone(&flag);
    std::thread::spawn(move || {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            watcher.store(true, Ordering::SeqCst);
        }
    });
    flag
}

pub fn run(args: ExtractArgs) -> Result<()> {
    let logger = get_logger();
    let Some(selector) = args.selector() else {
        anyhow::bail!("Pass --date, or both --start and --end");
    };
    let destination = args.output.clone().unwrap_or_else(default_destination);

    let session = get_session()?;
    if session.is_demo() && !args.json {
        output::info("Demo mode: extracting from the built-in ledger");
    }

    let mut handle = match session.submit(RunRequest::new(selector, destination)) {
        Ok(handle) => handle,
        Err(e) => {
            log_event(&logger, LogEvent::new(EXTRACTION_FAILED).with_command("extract").with_error(&e));
            return Err(e.into());
        }
    };
    log_event(&logger, LogEvent::new(EXTRACTION_STARTED).with_command("extract"));

    let spinner = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")?);
    spinner.enable_steady_tick(POLL_INTERVAL);

    let interrupted = watch_interrupt();
    let mut cancel_sent = false;
    while !handle.is_finished() {
        if let Some(RunEvent::Progress(state)) = handle.next_event_timeout(POLL_INTERVAL) {
            tracing::debug!(phase = %state, "extraction progress");
            if !cancel_sent {
                spinner.set_message(phase_label(state));
            }
        }
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            cancel_sent = session.cancel();
            spinner.set_message("Cancelling...");
        }
    }
    spinner.finish_and_clear();

    let outcome = handle.wait();
    match &outcome {
        Ok(_) => log_event(&logger, LogEvent::new(EXTRACTION_COMPLETED).with_command("extract")),
        Err(failure) => {
            let mut event = LogEvent::new(EXTRACTION_FAILED).with_command("extract");
            event.error_kind = Some(failure.kind.as_str().to_string());
            event.error_message = Some(failure.to_string());
            log_event(&logger, event);
        }
    }

    if args.json {
        let body = match &outcome {
            Ok(result) => serde_json::json!({ "ok": true, "result": result }),
            Err(failure) => serde_json::json!({ "ok": false, "error": failure }),
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return outcome.map(|_| ()).map_err(Into::into);
    }

    match outcome {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(failure) => Err(print_failure(failure)),
    }
}

fn print_result(result: &ExtractionResult) {
    output::success("Extraction complete");
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Report", "Rows", "File"]);
    table.add_row(vec![
        "Invoices".to_string(),
        result.row_counts.invoices.to_string(),
        result.invoice_file_path.display().to_string(),
    ]);
    table.add_row(vec![
        "Counterparties".to_string(),
        result.row_counts.partners.to_string(),
        result.partner_file_path.display().to_string(),
    ]);
    println!("{}", table);
    println!("Finished in {:.2}s", result.elapsed.as_secs_f64());

    if !result.warnings.is_empty() {
        println!();
        for warning in &result.warnings {
            output::warning(&format!("  ! {}", warning));
        }
    }
}

fn print_failure(failure: ExtractionFailure) -> anyhow::Error {
    if failure.kind == ErrorKind::Cancelled {
        output::warning("No reports were written");
    }
    failure.into()
}
