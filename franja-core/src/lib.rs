//! Franja Core - Odoo invoice and counterparty extraction to spreadsheets
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities (ConnectionConfig, InvoiceRecord, RunState, etc.)
//! - **ports**: Trait definitions for external dependencies (Connector, CredentialSource)
//! - **services**: Vault, connection pool, query engine, reports, orchestration
//! - **adapters**: Concrete implementations (PostgreSQL, DuckDB, demo ledger, XLSX)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use adapters::duckdb::ConfigStore;
use adapters::postgres::PgConnector;
use config::Settings;
use ports::CredentialSource;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, ErrorKind, Result};
pub use domain::{
    ConnectionConfig, ConnectionTestResult, DateSelector, ExtractionFailure, ExtractionResult,
    RowCounts, RunEvent, RunRecord, RunState, ValidatedRange,
};
pub use ports::Connector;
pub use services::{
    EntryPoint, LogEntry, LogEvent, LoggingService, PoolStatus, RunHandle, RunRequest,
};

/// Main entry point for Franja operations
///
/// Owns the config store, the credential vault, the connection pool and
/// the extraction worker. The pool is built lazily from the saved
/// configuration and rebuilt whenever the configuration changes.
pub struct Extractor<C: Connector + Clone> {
    app_dir: PathBuf,
    settings: Settings,
    store: Arc<ConfigStore>,
    vault: Arc<CredentialVault>,
    connector: C,
    pool: Mutex<Option<ConnectionPool<C>>>,
    runs: ExtractionService<C>,
}

impl Extractor<PgConnector> {
    /// Open the extractor for a PostgreSQL source using settings from `app_dir`
    pub fn open(app_dir: &Path) -> Result<Self> {
        let settings = Settings::load(app_dir)?;
        let connector = PgConnector::new(settings.query.statement_timeout());
        Self::with_connector(app_dir, settings, connector)
    }
}

impl<C: Connector + Clone> Extractor<C> {
    pub fn with_connector(app_dir: &Path, settings: Settings, connector: C) -> Result<Self> {
        Self::with_options(app_dir, settings, connector, VaultOptions::default())
    }

    pub fn with_options(
        app_dir: &Path,
        settings: Settings,
        connector: C,
        vault_options: VaultOptions,
    ) -> Result<Self> {
        settings.validate()?;
        let store = Arc::new(ConfigStore::open(app_dir)?);
        let vault = Arc::new(CredentialVault::new(Arc::clone(&store), vault_options));

        Ok(Self {
            app_dir: app_dir.to_path_buf(),
            settings,
            store,
            vault,
            connector,
            pool: Mutex::new(None),
            runs: ExtractionService::start()?,
        })
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_configured(&self) -> Result<bool> {
        self.vault.is_configured()
    }

    /// The saved configuration, decrypted
    pub fn connection(&self) -> Result<ConnectionConfig> {
        self.vault.load()
    }

    fn lock_pool(&self) -> Result<MutexGuard<'_, Option<ConnectionPool<C>>>> {
        self.pool
            .lock()
            .map_err(|e| Error::persistence(format!("Lock poisoned: {}", e)))
    }

    /// Save a new connection configuration and drop the current pool
    ///
    /// Fails with [`Error::Busy`] while an extraction is running.
    pub fn configure(&self, config: &ConnectionConfig) -> Result<()> {
        let mut pool = self.lock_pool()?;
        if self.runs.is_running() {
            return Err(Error::Busy);
        }
        self.vault.save(config)?;
        if let Some(old) = pool.take() {
            old.close();
        }
        Ok(())
    }

    /// Forget the saved configuration
    pub fn clear_configuration(&self) -> Result<bool> {
        let mut pool = self.lock_pool()?;
        if self.runs.is_running() {
            return Err(Error::Busy);
        }
        if let Some(old) = pool.take() {
            old.close();
        }
        self.vault.clear()
    }

    /// Try a short-lived connection with `config`; nothing is saved
    pub fn test_connection(&self, config: &ConnectionConfig) -> ConnectionTestResult {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return ConnectionTestResult::fail(format!("Cannot start runtime: {}", e)),
        };
        runtime.block_on(CredentialVault::test(&self.connector, config))
    }

    /// Pool size comes from the saved config; the connect timeout is
    /// narrowed per attempt to the config's own `timeout_secs`
    fn pool_options(&self, config: &ConnectionConfig) -> PoolOptions {
        PoolOptions::from_settings(&self.settings).with_max_size(config.pool_size)
    }

    fn current_pool(&self, slot: &mut Option<ConnectionPool<C>>) -> Result<ConnectionPool<C>> {
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let config = self.vault.load()?;
        let options = self.pool_options(&config);
        tracing::debug!(max_size = options.max_size, "building connection pool");
        let credentials: Arc<dyn CredentialSource> = self.vault.clone();
        let pool = ConnectionPool::new(self.connector.clone(), credentials, options);
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Start an extraction in the background
    ///
    /// Fails with [`Error::Busy`] while another run is in flight and with
    /// [`Error::NotConfigured`] before a connection has been saved.
    pub fn submit(&self, selector: DateSelector, destination: impl Into<PathBuf>) -> Result<RunHandle> {
        self.submit_request(RunRequest::new(selector, destination))
    }

    pub fn submit_request(&self, request: RunRequest) -> Result<RunHandle> {
        let mut slot = self.lock_pool()?;
        if self.runs.is_running() {
            return Err(Error::Busy);
        }
        let pool = self.current_pool(&mut slot)?;
        let context = RunContext {
            pool,
            store: Arc::clone(&self.store),
            policy: RangePolicy::from_settings(&self.settings),
            statement_timeout: self.settings.query.statement_timeout(),
        };
        self.runs.submit(request, context)
    }

    /// Run an extraction to completion, reporting each phase to `progress`
    pub fn run_extraction(
        &self,
        selector: DateSelector,
        destination: impl Into<PathBuf>,
        progress: impl FnMut(RunState),
    ) -> std::result::Result<ExtractionResult, ExtractionFailure> {
        self.submit(selector, destination)
            .map_err(|e| ExtractionFailure::from_error(&e, RunState::Idle))?
            .wait_with(progress)
    }

    /// Ask the running extraction to stop; returns whether one was running
    pub fn cancel(&self) -> bool {
        self.runs.cancel()
    }

    pub fn is_running(&self) -> bool {
        self.runs.is_running()
    }

    /// Most recent successful runs first
    pub fn history(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.recent_runs(limit)
    }

    /// Occupancy of the current pool, if one has been built
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.pool
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|pool| pool.status()))
    }
}
