//! Connection pool
//!
//! A counted semaphore bounds the number of live checkouts; idle connections
//! wait in a queue with the time they were returned. Checkouts are scoped:
//! dropping a [`PooledConnection`] returns it to the pool, or discards it when
//! it was marked broken, on every exit path.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};

use crate::config::Settings;
use crate::domain::result::{Error, Result};
use crate::ports::{Connector, CredentialSource, SourceConnection};

/// Pool sizing and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: u32,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle connections older than this are pinged before reuse
    pub stale_after: Duration,
}

impl PoolOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_size: settings.pool.max_size,
            acquire_timeout: settings.pool.acquire_timeout(),
            connect_timeout: settings.query.connect_timeout(),
            stale_after: settings.pool.stale_after(),
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: u32,
    pub idle: usize,
    pub in_use: usize,
}

struct Idle<T> {
    conn: T,
    since: Instant,
}

struct PoolInner<C: Connector> {
    connector: C,
    credentials: Arc<dyn CredentialSource>,
    options: PoolOptions,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Idle<C::Connection>>>,
    closed: AtomicBool,
}

impl<C: Connector> PoolInner<C> {
    fn pop_idle(&self) -> Option<Idle<C::Connection>> {
        self.idle.lock().map(|mut idle| idle.pop_back()).unwrap_or(None)
    }

    fn release(&self, conn: C::Connection, broken: bool) {
        if broken || self.closed.load(Ordering::Acquire) {
            tracing::debug!(broken, "discarding connection");
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push_back(Idle {
                conn,
                since: Instant::now(),
            });
        }
    }

    /// Open a new connection; credentials live only for this attempt
    async fn open(&self) -> Result<C::Connection> {
        let config = self.credentials.credentials()?;
        let connect_timeout = Duration::from_secs(config.timeout_secs).min(self.options.connect_timeout);

        match timeout(connect_timeout, self.connector.connect(&config)).await {
            Ok(Ok(conn)) => {
                tracing::debug!(host = %config.host, "opened connection");
                Ok(conn)
            }
            Ok(Err(e)) => Err(e.into_error("connect")),
            Err(_) => Err(Error::Timeout(format!(
                "could not connect to {}:{} within {}s",
                config.host,
                config.port,
                connect_timeout.as_secs()
            ))),
        }
    }

    async fn ping(&self, conn: &mut C::Connection) -> bool {
        matches!(
            timeout(self.options.connect_timeout, conn.ping()).await,
            Ok(Ok(()))
        )
    }
}

/// Bounded pool of source connections
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, credentials: Arc<dyn CredentialSource>, options: PoolOptions) -> Self {
        let options = options.with_max_size(options.max_size);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                credentials,
                semaphore: Arc::new(Semaphore::new(options.max_size as usize)),
                options,
                idle: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Check out a connection
    ///
    /// Waits up to the acquire timeout for a free slot, then fails with
    /// [`Error::PoolExhausted`]. Idle connections past the staleness threshold
    /// are pinged first and replaced when the ping fails.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let wait = self.inner.options.acquire_timeout;
        let permit = match timeout(wait, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Network("connection pool is closed".to_string())),
            Err(_) => {
                tracing::warn!(wait_secs = wait.as_secs_f64(), "connection pool exhausted");
                return Err(Error::PoolExhausted(wait));
            }
        };

        while let Some(idle) = self.inner.pop_idle() {
            let mut conn = idle.conn;
            if idle.since.elapsed() < self.inner.options.stale_after
                || self.inner.ping(&mut conn).await
            {
                return Ok(PooledConnection::new(conn, Arc::clone(&self.inner), permit));
            }
            tracing::debug!("stale connection failed health check, replacing");
        }

        let conn = self.inner.open().await?;
        Ok(PooledConnection::new(conn, Arc::clone(&self.inner), permit))
    }

    /// Verify that a connection can be checked out and answers a trivial query
    pub async fn health_check(&self) -> bool {
        match self.acquire().await {
            Ok(mut conn) => {
                let alive = self.inner.ping(&mut *conn).await;
                if !alive {
                    conn.mark_broken();
                }
                alive
            }
            Err(e) => {
                tracing::debug!(error = %e, "health check could not acquire a connection");
                false
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let max_size = self.inner.options.max_size;
        let idle = self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        let available = self.inner.semaphore.available_permits();
        PoolStatus {
            max_size,
            idle,
            in_use: (max_size as usize).saturating_sub(available),
        }
    }

    /// Drop every idle connection; checked-out ones are discarded on return
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A checked-out connection
pub struct PooledConnection<C: Connector> {
    // Present until drop
    conn: Option<C::Connection>,
    broken: bool,
    pool: Arc<PoolInner<C>>,
    // Declared last so the slot frees only after the connection is back in the queue
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    fn new(conn: C::Connection, pool: Arc<PoolInner<C>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            broken: false,
            pool,
            _permit: permit,
        }
    }

    /// Close the connection instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.broken);
        }
    }
}
