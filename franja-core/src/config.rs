//! Configuration management
//!
//! Tunables live in `settings.json` inside the franja directory:
//! ```json
//! {
//!   "demoMode": false,
//!   "pool": { "maxSize": 5, "acquireTimeoutSecs": 5, "staleAfterSecs": 60 },
//!   "query": { "connectTimeoutSecs": 5, "statementTimeoutSecs": 9, "maxRangeDays": 366 }
//! }
//! ```
//! Unknown keys are preserved when the file is saved again.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 9;
pub const DEFAULT_MAX_RANGE_DAYS: u32 = 366;

/// Connection pool tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    pub max_size: u32,
    pub acquire_timeout_secs: u64,
    /// Idle time after which a pooled connection is health-checked before reuse
    pub stale_after_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Query tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySettings {
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
    /// Longest accepted window, counting both end days
    pub max_range_days: u32,
    pub allow_future_dates: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
            max_range_days: DEFAULT_MAX_RANGE_DAYS,
            allow_future_dates: false,
        }
    }
}

impl QuerySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    demo_mode: bool,
    #[serde(default)]
    pool: PoolSettings,
    #[serde(default)]
    query: QuerySettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Franja settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub demo_mode: bool,
    pub pool: PoolSettings,
    pub query: QuerySettings,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Settings {
    /// Load settings from the franja directory
    ///
    /// Environment overrides (for CI/testing):
    /// - `FRANJA_DEMO_MODE`
    /// - `FRANJA_POOL_SIZE`
    /// - `FRANJA_MAX_RANGE_DAYS`
    pub fn load(franja_dir: &Path) -> Result<Self> {
        let settings_path = franja_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .map_err(|e| Error::Config(format!("Cannot read {}: {}", SETTINGS_FILE, e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Invalid {}: {}", SETTINGS_FILE, e)))?
        } else {
            SettingsFile::default()
        };

        let demo_mode = match std::env::var("FRANJA_DEMO_MODE").ok().as_deref() {
            Some("true" | "1" | "yes" | "TRUE" | "YES") => true,
            Some("false" | "0" | "no" | "FALSE" | "NO") => false,
            _ => raw.demo_mode,
        };

        let mut pool = raw.pool.clone();
        if let Some(size) = env_number("FRANJA_POOL_SIZE")? {
            pool.max_size = size;
        }

        let mut query = raw.query.clone();
        if let Some(days) = env_number("FRANJA_MAX_RANGE_DAYS")? {
            query.max_range_days = days;
        }

        let settings = Self {
            demo_mode,
            pool,
            query,
            _raw_settings: raw,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the franja directory
    /// Preserves keys this version does not manage
    pub fn save(&self, franja_dir: &Path) -> Result<()> {
        self.validate()?;
        let settings_path = franja_dir.join(SETTINGS_FILE);

        let mut raw = self._raw_settings.clone();
        raw.demo_mode = self.demo_mode;
        raw.pool = self.pool.clone();
        raw.query = self.query.clone();

        let content = serde_json::to_string_pretty(&raw)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&settings_path, content)
            .map_err(|e| Error::Config(format!("Cannot write {}: {}", SETTINGS_FILE, e)))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max_size == 0 {
            return Err(Error::Config("pool.maxSize must be at least 1".into()));
        }
        if self.pool.acquire_timeout_secs == 0 {
            return Err(Error::Config("pool.acquireTimeoutSecs must be at least 1".into()));
        }
        if self.query.connect_timeout_secs == 0 || self.query.statement_timeout_secs == 0 {
            return Err(Error::Config("query timeouts must be at least 1 second".into()));
        }
        if self.query.max_range_days == 0 {
            return Err(Error::Config("query.maxRangeDays must be at least 1".into()));
        }
        Ok(())
    }

    pub fn enable_demo_mode(&mut self) {
        self.demo_mode = true;
    }

    pub fn disable_demo_mode(&mut self) {
        self.demo_mode = false;
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} must be a positive number", name))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.pool.max_size, DEFAULT_POOL_SIZE);
        assert_eq!(settings.query.statement_timeout_secs, DEFAULT_STATEMENT_TIMEOUT_SECS);
        assert_eq!(settings.query.max_range_days, DEFAULT_MAX_RANGE_DAYS);
    }

    #[test]
    fn test_partial_file_and_unknown_keys_preserved() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"pool": {"maxSize": 2}, "theme": "dark"}"#,
        )
        .unwrap();

        let mut settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.pool.max_size, 2);
        assert_eq!(settings.pool.acquire_timeout_secs, DEFAULT_ACQUIRE_TIMEOUT_SECS);

        settings.query.max_range_days = 31;
        settings.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
        assert!(content.contains("\"theme\": \"dark\""));
        assert!(content.contains("\"maxRangeDays\": 31"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), r#"{"pool": {"maxSize": 0}}"#).unwrap();
        assert!(matches!(Settings::load(dir.path()), Err(Error::Config(_))));

        std::fs::write(dir.path().join(SETTINGS_FILE), "not json").unwrap();
        assert!(matches!(Settings::load(dir.path()), Err(Error::Config(_))));
    }
}
