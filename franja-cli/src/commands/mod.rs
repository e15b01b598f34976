//! CLI command implementations

pub mod configure;
pub mod connection;
pub mod demo;
pub mod extract;
pub mod history;
pub mod logs;
pub mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use franja_core::adapters::demo::DemoLedger;
use franja_core::adapters::postgres::PgConnector;
use franja_core::config::Settings;
use franja_core::{
    ConnectionConfig, ConnectionTestResult, EntryPoint, Extractor, LogEvent, LoggingService,
    RunHandle, RunRecord, RunRequest,
};

/// Days of generated activity behind demo mode
const DEMO_DAYS: u32 = 150;

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let app_dir = get_app_dir().ok()?;
    std::fs::create_dir_all(&app_dir).ok()?;
    LoggingService::new(&app_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the franja directory from environment or default
pub fn get_app_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("FRANJA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".franja"))
        .context("Could not find home directory; set FRANJA_DIR")
}

pub fn load_settings() -> Result<(PathBuf, Settings)> {
    let app_dir = get_app_dir()?;
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("Failed to create franja directory: {:?}", app_dir))?;
    let settings = Settings::load(&app_dir).context("Failed to load settings")?;
    Ok((app_dir, settings))
}

/// An extractor wired to the live database or to the demo ledger
pub enum Session {
    Live(Extractor<PgConnector>),
    Demo(Extractor<DemoLedger>),
}

macro_rules! with_extractor {
    ($session:expr, $ex:ident => $body:expr) => {
        match $session {
            Session::Live($ex) => $body,
            Session::Demo($ex) => $body,
        }
    };
}

impl Session {
    pub fn is_demo(&self) -> bool {
        matches!(self, Session::Demo(_))
    }

    pub fn app_dir(&self) -> &Path {
        with_extractor!(self, ex => ex.app_dir())
    }

    pub fn settings(&self) -> &Settings {
        with_extractor!(self, ex => ex.settings())
    }

    pub fn is_configured(&self) -> franja_core::Result<bool> {
        with_extractor!(self, ex => ex.is_configured())
    }

    pub fn connection(&self) -> franja_core::Result<ConnectionConfig> {
        with_extractor!(self, ex => ex.connection())
    }

    pub fn configure(&self, config: &ConnectionConfig) -> franja_core::Result<()> {
        with_extractor!(self, ex => ex.configure(config))
    }

    pub fn clear_configuration(&self) -> franja_core::Result<bool> {
        with_extractor!(self, ex => ex.clear_configuration())
    }

    pub fn test_connection(&self, config: &ConnectionConfig) -> ConnectionTestResult {
        with_extractor!(self, ex => ex.test_connection(config))
    }

    pub fn submit(&self, request: RunRequest) -> franja_core::Result<RunHandle> {
        with_extractor!(self, ex => ex.submit_request(request))
    }

    pub fn cancel(&self) -> bool {
        with_extractor!(self, ex => ex.cancel())
    }

    pub fn history(&self, limit: usize) -> franja_core::Result<Vec<RunRecord>> {
        with_extractor!(self, ex => ex.history(limit))
    }
}

/// Open the extractor for the current mode
///
/// Demo mode keeps its own store under `demo/` and is configured with
/// placeholder credentials on first use.
pub fn get_session() -> Result<Session> {
    let (app_dir, settings) = load_settings()?;

    if !settings.demo_mode {
        let extractor = Extractor::<PgConnector>::open(&app_dir).context("Failed to open franja")?;
        return Ok(Session::Live(extractor));
    }

    let from = Local::now().date_naive() - chrono::Duration::days(i64::from(DEMO_DAYS) - 30);
    let ledger = DemoLedger::generated(from, DEMO_DAYS);
    let demo_dir = app_dir.join("demo");
    let extractor = Extractor::with_connector(&demo_dir, settings, ledger)
        .context("Failed to open demo store")?;
    if !extractor.is_configured()? {
        extractor.configure(&demo_connection())?;
    }
    Ok(Session::Demo(extractor))
}

pub fn demo_connection() -> ConnectionConfig {
    ConnectionConfig::new("demo.franja.local", 5432, "odoo_demo", "demo", "demo")
}
