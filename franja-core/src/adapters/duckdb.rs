//! DuckDB config store
//!
//! Holds the single saved connection (secret sealed), the vault's key
//! material and the extraction run history in `config.duckdb`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{KeyMaterial, RunRecord, SealedSecret};
use crate::migrations::MIGRATIONS;
use crate::services::MigrationService;

pub const CONFIG_DB_FILE: &str = "config.duckdb";

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("could not set lock")
}

/// Connection parameters in their persisted form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConnection {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: SealedSecret,
    pub pool_size: u32,
    pub timeout_secs: u64,
}

/// Local embedded store for configuration and run history
pub struct ConfigStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl ConfigStore {
    /// Open (or create) the store in `app_dir`
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn open(app_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir).map_err(|e| {
            Error::persistence(format!("Cannot create {}: {}", app_dir.display(), e))
        })?;
        let db_path = app_dir.join(CONFIG_DB_FILE);

        let mut attempt = 0;
        let conn = loop {
            match Connection::open(&db_path) {
                Ok(conn) => break conn,
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            "config store busy, retrying"
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::persistence(format!(
                        "Cannot open {}: {}",
                        db_path.display(),
                        err_msg
                    )));
                }
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests and demo runs
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        let result = MigrationService::new(&conn, MIGRATIONS).run_pending()?;
        if !result.applied.is_empty() {
            tracing::debug!(applied = ?result.applied, "config store migrated");
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::persistence(format!("Lock poisoned: {}", e)))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // === Vault key material ===

    pub fn load_key_material(&self) -> Result<Option<KeyMaterial>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key_material FROM vault_keys WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                let material = serde_json::from_str(&json).map_err(|e| {
                    Error::Decryption(format!("Corrupt key material: {}", e))
                })?;
                Ok(Some(material))
            }
            None => Ok(None),
        }
    }

    /// Persist key material; the first stored salt is never replaced
    pub fn save_key_material(&self, material: &KeyMaterial) -> Result<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(material).map_err(|e| Error::persistence(e.to_string()))?;
        conn.execute(
            "INSERT INTO vault_keys (id, key_material, created_at) VALUES (1, ?, ?)
             ON CONFLICT (id) DO NOTHING",
            params![json, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    // === Connection config ===

    pub fn load_connection(&self) -> Result<Option<StoredConnection>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT host, port, database_name, username, password_nonce, password_ciphertext,
                    pool_size, timeout_secs
             FROM connection_config WHERE id = 1",
        )?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let port: i32 = row.get(1)?;
        let pool_size: i32 = row.get(6)?;
        let timeout_secs: i64 = row.get(7)?;
        Ok(Some(StoredConnection {
            host: row.get(0)?,
            port: u16::try_from(port)
                .map_err(|_| Error::persistence(format!("Stored port out of range: {}", port)))?,
            database: row.get(2)?,
            username: row.get(3)?,
            password: SealedSecret {
                nonce: row.get(4)?,
                ciphertext: row.get(5)?,
            },
            pool_size: u32::try_from(pool_size).map_err(|_| {
                Error::persistence(format!("Stored pool size out of range: {}", pool_size))
            })?,
            timeout_secs: u64::try_from(timeout_secs).map_err(|_| {
                Error::persistence(format!("Stored timeout out of range: {}", timeout_secs))
            })?,
        }))
    }

    /// Replace the saved connection in one statement
    pub fn save_connection(&self, stored: &StoredConnection) -> Result<()> {
        let pool_size = i32::try_from(stored.pool_size).map_err(|_| {
            Error::persistence(format!("Pool size too large to store: {}", stored.pool_size))
        })?;
        let timeout_secs = i64::try_from(stored.timeout_secs).map_err(|_| {
            Error::persistence(format!("Timeout too large to store: {}", stored.timeout_secs))
        })?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO connection_config (
                id, host, port, database_name, username, password_nonce,
                password_ciphertext, pool_size, timeout_secs, updated_at
             ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                database_name = EXCLUDED.database_name,
                username = EXCLUDED.username,
                password_nonce = EXCLUDED.password_nonce,
                password_ciphertext = EXCLUDED.password_ciphertext,
                pool_size = EXCLUDED.pool_size,
                timeout_secs = EXCLUDED.timeout_secs,
                updated_at = EXCLUDED.updated_at",
            params![
                stored.host,
                i32::from(stored.port),
                stored.database,
                stored.username,
                stored.password.nonce,
                stored.password.ciphertext,
                pool_size,
                timeout_secs,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Remove the saved connection, returning whether one existed
    pub fn clear_connection(&self) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM connection_config WHERE id = 1", [])?;
        Ok(rows > 0)
    }

    // === Run history ===

    pub fn record_run(&self, record: &RunRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO extraction_history (
                id, start_date, end_date, invoice_rows, partner_rows, elapsed_secs, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.to_string(),
                record.start_date.to_string(),
                record.end_date.to_string(),
                record.invoice_rows as i64,
                record.partner_rows as i64,
                record.elapsed_secs,
                format_timestamp(record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, CAST(start_date AS VARCHAR), CAST(end_date AS VARCHAR),
                    invoice_rows, partner_rows, elapsed_secs, CAST(created_at AS VARCHAR)
             FROM extraction_history
             ORDER BY created_at DESC, id
             LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, start, end, invoices, partners, elapsed_secs, created_at) = row?;
            records.push(RunRecord {
                id: Uuid::parse_str(&id).map_err(|e| Error::persistence(e.to_string()))?,
                start_date: parse_date(&start)?,
                end_date: parse_date(&end)?,
                invoice_rows: invoices.max(0) as u64,
                partner_rows: partners.max(0) as u64,
                elapsed_secs,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(records)
    }

    pub fn run_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM extraction_history", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

// Helper functions

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::persistence(format!("Invalid timestamp '{}': {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::persistence(format!("Invalid date '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> StoredConnection {
        StoredConnection {
            host: "db.local".to_string(),
            port: 5432,
            database: "odoo".to_string(),
            username: "reader".to_string(),
            password: SealedSecret {
                nonce: "bm9uY2U=".to_string(),
                ciphertext: "Y2lwaGVy".to_string(),
            },
            pool_size: 5,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_connection_single_row_overwrite() {
        let store = ConfigStore::open_in_memory().unwrap();
        assert!(store.load_connection().unwrap().is_none());

        store.save_connection(&sample()).unwrap();
        let mut updated = sample();
        updated.host = "db2.local".to_string();
        store.save_connection(&updated).unwrap();

        assert_eq!(store.load_connection().unwrap(), Some(updated));
        let count: i64 = store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM connection_config", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        assert!(store.clear_connection().unwrap());
        assert!(store.load_connection().unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_numbers_are_not_wrapped() {
        let store = ConfigStore::open_in_memory().unwrap();

        let mut huge = sample();
        huge.pool_size = 3_000_000_000;
        assert!(matches!(store.save_connection(&huge), Err(Error::Persistence(_))));

        let mut huge = sample();
        huge.timeout_secs = u64::MAX;
        assert!(matches!(store.save_connection(&huge), Err(Error::Persistence(_))));
        assert!(store.load_connection().unwrap().is_none());

        store.save_connection(&sample()).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE connection_config SET timeout_secs = -1", [])
            .unwrap();
        assert!(matches!(store.load_connection(), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_failed_write_is_persistence_error() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.execute_batch("DROP TABLE connection_config").unwrap();

        let err = store.save_connection(&sample()).unwrap_err();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Persistence);
    }

    #[test]
    fn test_key_material_is_kept() {
        let store = ConfigStore::open_in_memory().unwrap();
        let first = KeyMaterial::new("Zmlyc3Q=".to_string(), Default::default());
        let second = KeyMaterial::new("c2Vjb25k".to_string(), Default::default());
        store.save_key_material(&first).unwrap();
        store.save_key_material(&second).unwrap();
        assert_eq!(store.load_key_material().unwrap(), Some(first));
    }

    #[test]
    fn test_run_history_newest_first() {
        let store = ConfigStore::open_in_memory().unwrap();
        let base = Utc::now();
        for (i, offset) in [0i64, 10, 5].iter().enumerate() {
            store
                .record_run(&RunRecord {
                    id: Uuid::new_v4(),
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                    invoice_rows: i as u64,
                    partner_rows: 1,
                    elapsed_secs: 0.5,
                    created_at: base + chrono::Duration::seconds(*offset),
                })
                .unwrap();
        }

        let runs = store.recent_runs(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].invoice_rows, 1);
        assert_eq!(runs[1].invoice_rows, 2);
        assert_eq!(runs[0].end_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(store.run_count().unwrap(), 3);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempdir().unwrap();
        {
            let store = ConfigStore::open(dir.path()).unwrap();
            store.save_connection(&sample()).unwrap();
        }
        let store = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.load_connection().unwrap(), Some(sample()));
        assert!(store.db_path().unwrap().ends_with(CONFIG_DB_FILE));
    }
}
