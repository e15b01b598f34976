//! Extraction orchestrator
//!
//! Runs one extraction at a time on a dedicated worker thread with its own
//! single-threaded tokio runtime. Callers submit a run and read progress and
//! the final outcome from a channel; a submission while a run is in flight
//! is rejected with [`Error::Busy`].

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, RecvTimeoutError, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Utc};
use futures::StreamExt;
use uuid::Uuid;

use crate::adapters::duckdb::ConfigStore;
use crate::domain::result::{Error, Result};
use crate::domain::{
    DateSelector, ExtractionFailure, ExtractionResult, RowCounts, RunEvent, RunRecord, RunState,
    ValidatedRange,
};
use crate::ports::Connector;

use super::pool::ConnectionPool;
use super::query::{self, RangePolicy};
use super::report::{self, InvoiceSheet, PartnerSheet, ReportMeta};

/// What to extract and where to put it
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub selector: DateSelector,
    pub destination: PathBuf,
    /// Fixed generation time for the metadata sheet; now when unset
    pub generated_at: Option<NaiveDateTime>,
}

impl RunRequest {
    pub fn new(selector: DateSelector, destination: impl Into<PathBuf>) -> Self {
        Self {
            selector,
            destination: destination.into(),
            generated_at: None,
        }
    }

    pub fn generated_at(mut self, generated_at: NaiveDateTime) -> Self {
        self.generated_at = Some(generated_at);
        self
    }
}

/// Shared resources a run works with
pub struct RunContext<C: Connector> {
    pub pool: ConnectionPool<C>,
    pub store: Arc<ConfigStore>,
    pub policy: RangePolicy,
    pub statement_timeout: Duration,
}

struct Job<C: Connector> {
    request: RunRequest,
    context: RunContext<C>,
    cancel: Arc<AtomicBool>,
    events: Sender<RunEvent>,
}

/// Clears the busy flag when the run ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Caller's side of a submitted run
pub struct RunHandle {
    events: Receiver<RunEvent>,
    state: RunState,
    outcome: Option<std::result::Result<ExtractionResult, ExtractionFailure>>,
    closed: bool,
}

impl RunHandle {
    fn observe(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Progress(state) => self.state = *state,
            RunEvent::Finished(outcome) => {
                self.state = if outcome.is_ok() {
                    RunState::Done
                } else {
                    RunState::Failed
                };
                self.outcome = Some(outcome.clone());
            }
        }
    }

    /// Last phase reported by the worker
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Block until the next event; `None` once the run has finished
    pub fn next_event(&mut self) -> Option<RunEvent> {
        let event = self.events.recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Next event if one is ready
    pub fn try_next_event(&mut self) -> Option<RunEvent> {
        match self.events.try_recv() {
            Ok(event) => {
                self.observe(&event);
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Wait at most `timeout` for the next event
    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<RunEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.observe(&event);
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Whether the outcome is known or the worker has gone away
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some() || self.closed
    }

    /// Block until the run finishes, reporting each phase change
    pub fn wait_with(
        mut self,
        mut progress: impl FnMut(RunState),
    ) -> std::result::Result<ExtractionResult, ExtractionFailure> {
        while let Some(event) = self.next_event() {
            if let RunEvent::Progress(state) = event {
                progress(state);
            }
        }
        self.outcome.take().unwrap_or_else(|| {
            Err(ExtractionFailure::from_error(
                &Error::Cancelled,
                self.state,
            ))
        })
    }

    /// Block until the run finishes
    pub fn wait(self) -> std::result::Result<ExtractionResult, ExtractionFailure> {
        self.wait_with(|_| {})
    }
}

/// Single-flight extraction runner
pub struct ExtractionService<C: Connector> {
    jobs: Option<SyncSender<Job<C>>>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<C: Connector> ExtractionService<C> {
    /// Start the worker thread
    pub fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::persistence(format!("Cannot start worker runtime: {}", e)))?;
        let (jobs, queue) = mpsc::sync_channel::<Job<C>>(1);
        let busy = Arc::new(AtomicBool::new(false));

        let worker_busy = Arc::clone(&busy);
        let worker = thread::Builder::new()
            .name("franja-extraction".to_string())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    let guard = BusyGuard(Arc::clone(&worker_busy));
                    let Job {
                        request,
                        context,
                        cancel,
                        events,
                    } = job;
                    let mut run = Run {
                        state: RunState::Idle,
                        events: &events,
                        cancel: &cancel,
                    };
                    let outcome = runtime.block_on(run.execute(request, context));
                    // Free the slot before the caller can observe completion
                    drop(guard);
                    let _ = events.send(RunEvent::Finished(outcome));
                }
            })
            .map_err(|e| Error::persistence(format!("Cannot start worker thread: {}", e)))?;

        Ok(Self {
            jobs: Some(jobs),
            busy,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Queue a run; fails with [`Error::Busy`] while another is in flight
    pub fn submit(&self, request: RunRequest, context: RunContext<C>) -> Result<RunHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        self.cancel.store(false, Ordering::Release);

        let (events, receiver) = mpsc::channel();
        let job = Job {
            request,
            context,
            cancel: Arc::clone(&self.cancel),
            events,
        };
        let sent = match &self.jobs {
            Some(jobs) => jobs.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        };
        match sent {
            Ok(()) => Ok(RunHandle {
                events: receiver,
                state: RunState::Idle,
                outcome: None,
                closed: false,
            }),
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(Error::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(Error::persistence("extraction worker has stopped"))
            }
        }
    }

    /// Ask the running extraction to stop at the next phase boundary
    ///
    /// Returns whether a run was in flight.
    pub fn cancel(&self) -> bool {
        if self.is_running() {
            self.cancel.store(true, Ordering::Release);
            tracing::info!("cancellation requested");
            true
        } else {
            false
        }
    }
}

impl<C: Connector> Drop for ExtractionService<C> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Run a query phase under the statement timeout
async fn within<T>(
    limit: Duration,
    statement: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} did not finish within {}s",
            statement,
            limit.as_secs()
        ))),
    }
}

/// Remove a report committed earlier in a run that then failed
///
/// A file that cannot be removed is named in the returned error.
fn discard_committed(path: &Path, error: Error) -> Error {
    let cleanup = match std::fs::remove_file(path) {
        Ok(()) => return error,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return error,
        Err(e) => e,
    };
    tracing::warn!(path = %path.display(), error = %cleanup, "could not remove committed report");
    let note = format!(
        "{} was left on disk and could not be removed: {}",
        path.display(),
        cleanup
    );
    match error {
        Error::FileWrite { path, reason } => Error::FileWrite {
            path,
            reason: format!("{}; {}", reason, note),
        },
        other => Error::file_write(path, format!("{}; {}", other, note)),
    }
}

fn prepare_destination(folder: &Path) -> Result<()> {
    std::fs::create_dir_all(folder).map_err(|e| Error::file_write(folder, e.to_string()))?;
    if !folder.is_dir() {
        return Err(Error::file_write(folder, "not a directory"));
    }
    Ok(())
}

struct Extracted {
    invoices: InvoiceSheet,
    partners: PartnerSheet,
    warnings: Vec<String>,
}

struct Run<'a> {
    state: RunState,
    events: &'a Sender<RunEvent>,
    cancel: &'a AtomicBool,
}

impl Run<'_> {
    fn advance(&mut self, next: RunState) {
        debug_assert!(self.state.can_advance_to(next), "{} -> {}", self.state, next);
        tracing::debug!(from = %self.state, to = %next, "extraction phase");
        self.state = next;
        let _ = self.events.send(RunEvent::Progress(next));
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn execute<C: Connector>(
        &mut self,
        request: RunRequest,
        context: RunContext<C>,
    ) -> std::result::Result<ExtractionResult, ExtractionFailure> {
        let started = Instant::now();
        match self.phases(&request, &context, started).await {
            Ok(result) => {
                self.advance(RunState::Done);
                tracing::info!(
                    invoices = result.row_counts.invoices,
                    partners = result.row_counts.partners,
                    elapsed_secs = result.elapsed.as_secs_f64(),
                    "extraction completed"
                );
                Ok(result)
            }
            Err(error) => {
                let failure = ExtractionFailure::from_error(&error, self.state);
                tracing::warn!(kind = failure.kind.as_str(), phase = %failure.phase, "extraction failed");
                self.advance(RunState::Failed);
                Err(failure)
            }
        }
    }

    async fn phases<C: Connector>(
        &mut self,
        request: &RunRequest,
        context: &RunContext<C>,
        started: Instant,
    ) -> Result<ExtractionResult> {
        self.advance(RunState::Validating);
        query::validate_statements()?;
        let range = query::validate_date_selector(
            &request.selector,
            &context.policy,
            Local::now().date_naive(),
        )?;
        prepare_destination(&request.destination)?;
        self.check_cancelled()?;

        self.advance(RunState::Connecting);
        let mut conn = context.pool.acquire().await?;
        let schema = within(
            context.statement_timeout,
            query::SCHEMA_CHECK_QUERY.name,
            query::check_required_tables(&mut *conn),
        )
        .await;
        if let Err(e) = schema {
            if e.is_connectivity() {
                conn.mark_broken();
            }
            return Err(e);
        }
        self.check_cancelled()?;

        self.advance(RunState::Extracting);
        let extracted = self
            .extract(&mut *conn, &range, context.statement_timeout)
            .await;
        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(e) => {
                if e.is_connectivity() {
                    conn.mark_broken();
                }
                return Err(e);
            }
        };
        drop(conn);
        self.check_cancelled()?;

        self.advance(RunState::Reporting);
        let Extracted {
            invoices,
            partners,
            mut warnings,
        } = extracted;
        let row_counts = RowCounts {
            invoices: invoices.len(),
            partners: partners.len(),
        };

        let mut meta = ReportMeta::new(range);
        if let Some(generated_at) = request.generated_at {
            meta = meta.generated_at(generated_at);
        }
        let invoice_report = report::prepare_invoice_report(invoices, &request.destination, &meta)?;
        let partner_report = report::prepare_partner_report(partners, &request.destination, &meta)?;
        self.check_cancelled()?;

        let invoice_file_path = invoice_report.commit()?;
        let partner_file_path = match partner_report.commit() {
            Ok(path) => path,
            Err(e) => return Err(discard_committed(&invoice_file_path, e)),
        };

        let elapsed = started.elapsed();
        let record = RunRecord {
            id: Uuid::new_v4(),
            start_date: range.start(),
            end_date: range.end(),
            invoice_rows: row_counts.invoices as u64,
            partner_rows: row_counts.partners as u64,
            elapsed_secs: elapsed.as_secs_f64(),
            created_at: Utc::now(),
        };
        if let Err(e) = context.store.record_run(&record) {
            tracing::warn!(error = %e, "could not record run history");
            warnings.push(format!("Run history was not recorded: {}", e));
        }

        Ok(ExtractionResult {
            invoice_file_path,
            partner_file_path,
            row_counts,
            elapsed,
            warnings,
        })
    }

    /// Pull both row sets through the report sheets
    ///
    /// Partners are kept only when an extracted invoice references them, so
    /// the two reports always cover the same counterparties.
    async fn extract<S: crate::ports::SourceConnection + ?Sized>(
        &self,
        conn: &mut S,
        range: &ValidatedRange,
        limit: Duration,
    ) -> Result<Extracted> {
        let mut invoices = InvoiceSheet::new();
        let mut referenced = BTreeSet::new();
        let mut unidentified = 0usize;

        within(limit, query::INVOICE_QUERY.name, async {
            let mut rows = query::fetch_invoices(&mut *conn, range);
            while let Some(record) = rows.next().await {
                let record = record?;
                if record.counterparty_identification.is_empty() {
                    unidentified += 1;
                }
                referenced.insert(record.counterparty_identification.clone());
                invoices.push(&record);
            }
            Ok::<(), Error>(())
        })
        .await?;

        let mut partners = PartnerSheet::new();
        let mut covered = BTreeSet::new();
        let mut unreferenced = 0usize;

        within(limit, query::PARTNER_QUERY.name, async {
            let mut rows = query::fetch_partners(&mut *conn, range);
            while let Some(record) = rows.next().await {
                let record = record?;
                if !referenced.contains(&record.identification_number) {
                    unreferenced += 1;
                    continue;
                }
                covered.insert(record.identification_number.clone());
                partners.push(&record);
            }
            Ok::<(), Error>(())
        })
        .await?;

        let mut warnings = Vec::new();
        if invoices.is_empty() {
            warnings.push(format!(
                "No invoices matched {}; the reports contain headers only",
                range
            ));
        }
        if unidentified > 0 {
            warnings.push(format!(
                "{} invoice line(s) have a counterparty without identification",
                unidentified
            ));
        }
        let uncovered = referenced.difference(&covered).count();
        if uncovered > 0 {
            warnings.push(format!(
                "{} counterparty identification(s) in the invoice report have no partner row",
                uncovered
            ));
        }
        if unreferenced > 0 {
            tracing::debug!(unreferenced, "dropped partners not referenced by any invoice");
        }

        Ok(Extracted {
            invoices,
            partners,
            warnings,
        })
    }
}
