//! Config store persistence tests
//!
//! Run with: cargo test --test config_store_test -- --nocapture

use std::time::Instant;

use chrono::{Duration, NaiveDate, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use franja_core::adapters::duckdb::ConfigStore;
use franja_core::RunRecord;

fn record(days_ago: i64, invoices: u64) -> RunRecord {
    RunRecord {
        id: Uuid::new_v4(),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        invoice_rows: invoices,
        partner_rows: 2,
        elapsed_secs: 1.25,
        created_at: Utc::now() - Duration::days(days_ago),
    }
}

/// Reopening the same file repeatedly applies migrations once and keeps data
#[test]
fn test_sequential_reopen_keeps_history() {
    let temp_dir = TempDir::new().unwrap();

    for i in 0..5 {
        let start = Instant::now();
        let store = ConfigStore::open(temp_dir.path()).unwrap();
        store.record_run(&record(i, i as u64)).unwrap();
        println!("Open {}: {:?}", i, start.elapsed());
    }

    let store = ConfigStore::open(temp_dir.path()).unwrap();
    assert_eq!(store.run_count().unwrap(), 5);
}

#[test]
fn test_history_newest_first() {
    let temp_dir = TempDir::new().unwrap();
    let store = ConfigStore::open(temp_dir.path()).unwrap();

    store.record_run(&record(3, 30)).unwrap();
    store.record_run(&record(1, 10)).unwrap();
    store.record_run(&record(2, 20)).unwrap();

    let runs = store.recent_runs(2).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].invoice_rows, 10);
    assert_eq!(runs[1].invoice_rows, 20);
    assert_eq!(runs[0].end_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    assert!((runs[0].elapsed_secs - 1.25).abs() < f64::EPSILON);
}
