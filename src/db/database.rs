//! The process-scoped database service.
//!
//! `Database` is constructed once (usually in `main`), shared as
//! `Arc<Database>`, initialized once and shut down once. It composes the pool
//! manager, the single-statement executor and the transaction coordinator.

use crate::config::{PoolSettings, SettingsStore};
use crate::db::executor::QueryExecutor;
use crate::db::pool::PoolManager;
use crate::db::transaction::{TransactionCoordinator, TxConnection};
use crate::error::DbResult;
use crate::models::{NamedParams, PoolInfo, QueryParam, Row};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug)]
pub struct Database {
    settings: PoolSettings,
    pool: Arc<PoolManager>,
    executor: QueryExecutor,
    transactions: TransactionCoordinator,
}

impl Database {
    /// Create a database service for `settings`. No connection is made yet.
    pub fn new(settings: PoolSettings) -> Self {
        Self::with_manager(settings, PoolManager::new())
    }

    /// Create a database service from the host's settings store.
    pub fn from_store(store: &impl SettingsStore) -> Self {
        Self::new(PoolSettings::from_store(store))
    }

    /// Use an existing pool, treated as already verified.
    pub fn attach(pool: PgPool) -> Self {
        Self::with_manager(PoolSettings::default(), PoolManager::attached(pool))
    }

    fn with_manager(settings: PoolSettings, manager: PoolManager) -> Self {
        let pool = Arc::new(manager);
        Self {
            settings,
            executor: QueryExecutor::new(Arc::clone(&pool)),
            transactions: TransactionCoordinator::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Connect and verify. Returns `false` (after logging) on failure.
    pub async fn initialize(&self) -> bool {
        self.pool.initialize(&self.settings).await
    }

    pub fn is_ready(&self) -> bool {
        self.pool.is_ready()
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await
    }

    pub async fn pool_info(&self) -> Option<PoolInfo> {
        self.pool.pool_info().await
    }

    pub async fn query(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<Vec<Row>> {
        self.executor.query_all(sql, params).await
    }

    pub async fn single(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<Option<Row>> {
        self.executor.query_one(sql, params).await
    }

    pub async fn scalar(
        &self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        self.executor.query_scalar(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<u64> {
        self.executor.execute(sql, params).await
    }

    pub async fn update(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<u64> {
        self.executor.update(sql, params).await
    }

    pub async fn insert(
        &self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        self.executor.insert(sql, params).await
    }

    pub async fn raw_query(&self, sql: &str, values: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.executor.raw_query(sql, values).await
    }

    pub async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        self.executor.batch_insert(table, columns, rows).await
    }

    pub async fn table_exists(&self, name: &str) -> DbResult<bool> {
        self.executor.table_exists(name).await
    }

    /// Run `work` inside one transaction. See [`TransactionCoordinator::run`].
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut TxConnection) -> BoxFuture<'c, DbResult<T>>,
    {
        self.transactions.run(work).await
    }
}
