//! Scoped transactions.
//!
//! `TransactionCoordinator::run` gives a unit of work one dedicated connection
//! wrapped in BEGIN and COMMIT. Any failure, including a failed COMMIT, is
//! followed by a ROLLBACK and returned as `DbError::Transaction`.
//!
//! The connection goes back to the pool exactly once. If the transaction may
//! still be open at that point (ROLLBACK failed, or the caller's future was
//! dropped or panicked mid-work) the connection is closed instead of pooled.

use crate::db::executor::{execute, fetch_all, first_value, returned_id};
use crate::db::pool::PoolManager;
use crate::db::sql::with_returning_id;
use crate::db::translate::{TranslatedQuery, translate};
use crate::error::{DbError, DbResult, TransactionStage};
use crate::models::{NamedParams, QueryParam, Row};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs units of work inside transactions.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    pool: Arc<PoolManager>,
}

impl TransactionCoordinator {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }

    /// Run `work` inside BEGIN/COMMIT on a dedicated connection.
    ///
    /// ```ignore
    /// let id = coordinator
    ///     .run(|tx| Box::pin(async move {
    ///         let id = tx.insert("INSERT INTO orders (total) VALUES (:t)", Some(&params)).await?;
    ///         tx.execute("UPDATE stock SET n = n - 1", None).await?;
    ///         Ok(id)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut TxConnection) -> BoxFuture<'c, DbResult<T>>,
    {
        self.pool.ensure_ready()?;
        let conn = self.pool.acquire().await?;
        let mut tx = TxConnection::new(conn);

        if let Err(e) = tx.control("BEGIN").await {
            // State of the session is unknown; do not pool it.
            tx.conn.close_on_drop();
            return Err(DbError::transaction(TransactionStage::Begin, e));
        }
        tx.open = true;
        debug!("Transaction started");

        match work(&mut tx).await {
            Ok(value) => match tx.control("COMMIT").await {
                Ok(()) => {
                    tx.open = false;
                    debug!("Transaction committed");
                    self.finish(tx);
                    Ok(value)
                }
                Err(e) => {
                    tx.rollback().await;
                    self.finish(tx);
                    Err(DbError::transaction(TransactionStage::Commit, e))
                }
            },
            Err(e) => {
                info!(error = %e, "Unit of work failed, rolling back");
                tx.rollback().await;
                self.finish(tx);
                Err(DbError::transaction(TransactionStage::UnitOfWork, e))
            }
        }
    }

    fn finish(&self, tx: TxConnection) {
        // Dropping the handle hands the connection back (or closes it if still open).
        drop(tx);
        debug!("Transaction connection released");
    }
}

/// The connection a unit of work runs on.
///
/// Statements run in issue order with the same translation rules as the
/// pooled executor.
pub struct TxConnection {
    conn: PoolConnection<Postgres>,
    /// BEGIN succeeded and neither COMMIT nor ROLLBACK has yet
    open: bool,
}

impl std::fmt::Debug for TxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxConnection")
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl TxConnection {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn, open: false }
    }

    pub async fn query(&mut self, sql: &str, params: Option<&NamedParams>) -> DbResult<Vec<Row>> {
        let query = translate(sql, params)?;
        fetch_all(&mut self.conn, &query).await
    }

    pub async fn single(&mut self, sql: &str, params: Option<&NamedParams>) -> DbResult<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    pub async fn scalar(
        &mut self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        Ok(self.single(sql, params).await?.and_then(first_value))
    }

    pub async fn execute(&mut self, sql: &str, params: Option<&NamedParams>) -> DbResult<u64> {
        let query = translate(sql, params)?;
        execute(&mut self.conn, &query).await
    }

    pub async fn insert(
        &mut self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        let sql = with_returning_id(sql);
        Ok(self.single(&sql, params).await?.and_then(returned_id))
    }

    pub async fn raw_query(&mut self, sql: &str, values: &[QueryParam]) -> DbResult<Vec<Row>> {
        let query = TranslatedQuery {
            sql: sql.to_string(),
            values: values.to_vec(),
        };
        fetch_all(&mut self.conn, &query).await
    }

    async fn control(&mut self, statement: &'static str) -> DbResult<()> {
        execute(&mut self.conn, &TranslatedQuery::plain(statement))
            .await
            .map(|_| ())
    }

    /// Roll back, leaving `open` set if that fails so the connection is closed.
    async fn rollback(&mut self) {
        match self.control("ROLLBACK").await {
            Ok(()) => {
                self.open = false;
                debug!("Transaction rolled back");
            }
            Err(e) => warn!(error = %e, "ROLLBACK failed, connection will be closed"),
        }
    }
}

impl Drop for TxConnection {
    fn drop(&mut self) {
        if self.open {
            warn!("Transaction still open, closing its connection instead of pooling it");
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_requires_ready_pool() {
        let coordinator = TransactionCoordinator::new(Arc::new(PoolManager::new()));
        let mut called = false;
        let result: DbResult<()> = coordinator
            .run(|_tx| {
                called = true;
                Box::pin(async { Ok(()) })
            })
            .await;

        assert!(matches!(result, Err(DbError::NotReady { .. })));
        assert!(!called);
    }

    fn unreachable_coordinator() -> TransactionCoordinator {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1));
        TransactionCoordinator::new(Arc::new(PoolManager::attached(pool)))
    }

    fn assert_send<T: Send>(value: T) -> T {
        value
    }

    #[tokio::test]
    async fn test_statement_unit_of_work_is_send() {
        let coordinator = unreachable_coordinator();
        let params = crate::named_params! { "id" => 1 };

        let run = coordinator.run(|tx| {
            Box::pin(async move {
                tx.execute("SELECT 1", None).await?;
                let rows = tx.query("SELECT :id::int AS id", Some(&params)).await?;
                let id = tx.insert("INSERT INTO t (a) VALUES (1)", None).await?;
                Ok((rows.len(), id))
            })
        });
        let result = assert_send(run).await;

        // The pool cannot connect, so nothing began.
        assert!(result.is_err());
        assert!(!matches!(result, Err(DbError::Transaction { .. })));
    }

    #[tokio::test]
    async fn test_unit_of_work_runs_in_spawned_task() {
        let coordinator = unreachable_coordinator();
        let handle = tokio::spawn(async move {
            coordinator
                .run(|tx| Box::pin(async move { tx.execute("SELECT 1", None).await }))
                .await
        });
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_acquire_failure_skips_unit_of_work() {
        let coordinator = unreachable_coordinator();

        let mut called = false;
        let result: DbResult<u64> = coordinator
            .run(|_tx| {
                called = true;
                Box::pin(async { Ok(1) })
            })
            .await;

        // Nothing began, so the failure is not reported as a transaction failure.
        assert!(result.is_err());
        assert!(!matches!(result, Err(DbError::Transaction { .. })));
        assert!(!called);
    }
}
