//! Connection pool management.
//!
//! `PoolManager` owns the process's single `PgPool`. The pool is built lazily
//! and only counts as ready after one verification round-trip succeeds.
//! Every acquisition checks readiness first, so nothing touches the pool
//! before initialization or after shutdown.

use crate::config::PoolSettings;
use crate::error::{DbError, DbResult};
use crate::models::PoolInfo;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

/// Statement used to prove the server is reachable.
const VERIFY_SQL: &str = "SELECT NOW()";

#[derive(Debug)]
pub struct PoolManager {
    pool: RwLock<Option<PgPool>>,
    ready: AtomicBool,
    /// Callers inside `acquire` that found no idle connection. This includes
    /// callers whose new connection is still being opened.
    waiting: AtomicUsize,
    acquire_timeout_ms: AtomicU64,
    /// Serializes `initialize` calls
    init_lock: Mutex<()>,
}

impl PoolManager {
    /// Create a manager with no pool. Nothing is ready until `initialize` succeeds.
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            ready: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            acquire_timeout_ms: AtomicU64::new(0),
            init_lock: Mutex::new(()),
        }
    }

    /// Wrap a pool built elsewhere. It is treated as already verified.
    pub fn attached(pool: PgPool) -> Self {
        let timeout_ms = pool.options().get_acquire_timeout().as_millis() as u64;
        Self {
            pool: RwLock::new(Some(pool)),
            ready: AtomicBool::new(true),
            waiting: AtomicUsize::new(0),
            acquire_timeout_ms: AtomicU64::new(timeout_ms),
            init_lock: Mutex::new(()),
        }
    }

    /// Build the pool and verify it with one round-trip.
    ///
    /// Returns `true` once the pool is ready. Failures are logged and leave the
    /// manager not ready; calling again builds a fresh pool.
    pub async fn initialize(&self, settings: &PoolSettings) -> bool {
        let _init = self.init_lock.lock().await;

        if self.is_ready() {
            info!("Connection pool already initialized");
            return true;
        }

        let target = settings.masked_url();
        if let Err(message) = settings.validate() {
            error!(db = %target, error = %message, "Invalid pool settings");
            return false;
        }

        // A pool left over from a failed attempt was never verified.
        if let Some(stale) = self.pool.write().await.take() {
            debug!("Discarding unverified connection pool");
            stale.close().await;
        }

        info!(
            db = %target,
            max_connections = settings.max_connections,
            idle_timeout_ms = settings.idle_timeout_ms,
            connection_timeout_ms = settings.connection_timeout_ms,
            "Initializing connection pool"
        );

        self.acquire_timeout_ms
            .store(settings.connection_timeout_ms, Ordering::SeqCst);
        let pool = create_pool(settings);

        match self.verify(&pool).await {
            Ok(server_time) => {
                *self.pool.write().await = Some(pool);
                self.ready.store(true, Ordering::SeqCst);
                info!(
                    db = %target,
                    server_time = %server_time,
                    "Connected to database"
                );
                true
            }
            Err(e) => {
                error!(
                    db = %target,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Database connection failed"
                );
                pool.close().await;
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Fail with `NotReady` unless the pool has been verified.
    pub fn ensure_ready(&self) -> DbResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(DbError::not_ready("connection pool is not initialized"))
        }
    }

    /// Check out a connection, waiting up to the acquisition timeout.
    pub async fn acquire(&self) -> DbResult<PoolConnection<Postgres>> {
        self.ensure_ready()?;
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbError::not_ready("connection pool has been shut down"))?;

        // Only callers that find no idle connection count as waiting.
        let _waiting = (pool.num_idle() == 0).then(|| WaitingGuard::enter(&self.waiting));
        let conn = pool.acquire().await.map_err(|e| self.acquire_error(e))?;
        trace!("Connection acquired");
        Ok(conn)
    }

    /// Return a connection to the pool.
    pub fn release(&self, conn: PoolConnection<Postgres>) {
        drop(conn);
        trace!("Connection released");
    }

    /// Close every connection and drop the pool. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let pool = self.pool.write().await.take();
        match pool {
            Some(pool) => {
                info!("Closing connection pool");
                pool.close().await;
                info!("Connection pool closed");
            }
            None => debug!("Connection pool already closed"),
        }
    }

    /// Current occupancy, or `None` when there is no pool.
    ///
    /// `waiting` counts acquirers that found no idle connection on arrival.
    pub async fn pool_info(&self) -> Option<PoolInfo> {
        self.pool.read().await.as_ref().map(|pool| PoolInfo {
            total: pool.size(),
            idle: pool.num_idle(),
            waiting: self.waiting.load(Ordering::SeqCst),
        })
    }

    async fn verify(&self, pool: &PgPool) -> DbResult<DateTime<Utc>> {
        let mut conn = pool.acquire().await.map_err(|e| self.acquire_error(e))?;
        let server_time: DateTime<Utc> = sqlx::query_scalar(VERIFY_SQL)
            .fetch_one(&mut *conn)
            .await
            .map_err(DbError::from)?;
        drop(conn);
        Ok(server_time)
    }

    fn acquire_error(&self, err: sqlx::Error) -> DbError {
        match err {
            sqlx::Error::PoolTimedOut => {
                let timeout_ms = self.acquire_timeout_ms.load(Ordering::SeqCst);
                warn!(timeout_ms, "Timed out waiting for a pooled connection");
                DbError::acquisition_timeout(timeout_ms)
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Database(_) => {
                let suggestion = connection_suggestion(&err);
                DbError::connection(format!("Failed to connect: {}", err), suggestion)
            }
            other => DbError::from(other),
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a caller as waiting for as long as it is alive, cancellation included.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn create_pool(settings: &PoolSettings) -> PgPool {
    let mut options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .database(&settings.database)
        .username(&settings.user)
        .application_name(env!("CARGO_PKG_NAME"));
    if !settings.password.is_empty() {
        options = options.password(&settings.password);
    }

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.connection_timeout())
        .idle_timeout(Some(settings.idle_timeout()))
        .test_before_acquire(settings.test_before_acquire)
        .connect_lazy_with(options)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the PostgreSQL server is running and accessible".to_string();
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the db_user and db_password settings".to_string();
    }

    if error_str.contains("does not exist") {
        return "Check that the database named by db_name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    "Verify db_host, db_port and network reachability".to_string()
}
