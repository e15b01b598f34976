//! Connection pool timing tests
//!
//! Uses tokio's paused clock so the acquire timeout can be asserted exactly.
//!
//! Run with: cargo test --test pool_test

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use franja_core::adapters::demo::DemoLedger;
use franja_core::ports::{CredentialSource, SourceError};
use franja_core::services::{ConnectionPool, PoolOptions};
use franja_core::Error;

use common::demo_config;

fn pool(ledger: &DemoLedger, max_size: u32) -> ConnectionPool<DemoLedger> {
    let credentials: Arc<dyn CredentialSource> = Arc::new(demo_config());
    let options = PoolOptions {
        max_size,
        acquire_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        stale_after: Duration::from_secs(60),
    };
    ConnectionPool::new(ledger.clone(), credentials, options)
}

#[tokio::test(start_paused = true)]
async fn test_third_acquire_fails_only_after_timeout() {
    let ledger = DemoLedger::new();
    let pool = pool(&ledger, 2);

    let _first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    let started = Instant::now();
    let third = pool.acquire().await;
    let waited = started.elapsed();

    assert!(matches!(third, Err(Error::PoolExhausted(_))));
    assert!(waited >= Duration::from_secs(5), "gave up after {:?}", waited);
    assert_eq!(pool.status().in_use, 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_acquire_gets_released_connection() {
    let ledger = DemoLedger::new();
    let pool = pool(&ledger, 2);

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(first);
    });

    let started = Instant::now();
    let third = pool.acquire().await;
    assert!(third.is_ok());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(ledger.connect_count(), 2);
}

async fn use_and_fail(pool: &ConnectionPool<DemoLedger>) -> Result<(), Error> {
    let _conn = pool.acquire().await?;
    Err(Error::validation("bail out early"))
}

#[tokio::test(start_paused = true)]
async fn test_connection_returned_on_error_path() {
    let ledger = DemoLedger::new();
    let pool = pool(&ledger, 1);

    assert!(use_and_fail(&pool).await.is_err());
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);

    assert!(pool.acquire().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_are_classified() {
    let ledger = DemoLedger::new();
    let pool = pool(&ledger, 2);

    ledger.fail_connect(Some(SourceError::Authentication("bad password".into())));
    assert!(matches!(pool.acquire().await, Err(Error::Authentication(_))));

    ledger.fail_connect(None);
    ledger.set_latency(Duration::from_secs(30));
    assert!(matches!(pool.acquire().await, Err(Error::Timeout(_))));

    // Failed attempts give their slot back
    assert_eq!(pool.status().in_use, 0);
}
