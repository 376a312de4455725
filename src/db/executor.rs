//! Query execution engine.
//!
//! `QueryExecutor` runs single statements on a pooled connection: it checks
//! readiness, translates named parameters, acquires a connection, runs the
//! statement and releases the connection again.
//!
//! The statement runners at the bottom of this module take a bare
//! `PgConnection`, so transactions reuse them on their dedicated connection.

use crate::db::params::bind_all;
use crate::db::pool::PoolManager;
use crate::db::sql::{build_batch_insert, with_returning_id};
use crate::db::translate::{TranslatedQuery, translate};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{NamedParams, QueryParam, Row};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::{Executor, PgConnection};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

const TABLE_EXISTS_SQL: &str =
    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = :table_name";

/// Query executor that handles database query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<PoolManager>,
}

impl QueryExecutor {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }

    /// Run a statement and return every row.
    pub async fn query_all(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<Vec<Row>> {
        self.pool.ensure_ready()?;
        let query = translate(sql, params)?;
        let mut conn = self.pool.acquire().await?;
        let result = fetch_all(&mut conn, &query).await;
        self.pool.release(conn);
        result
    }

    /// First row of `query_all`, if any.
    pub async fn query_one(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<Option<Row>> {
        Ok(self.query_all(sql, params).await?.into_iter().next())
    }

    /// First column of the first row. `None` for no row, no columns or NULL.
    pub async fn query_scalar(
        &self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        Ok(self.query_one(sql, params).await?.and_then(first_value))
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<u64> {
        self.pool.ensure_ready()?;
        let query = translate(sql, params)?;
        let mut conn = self.pool.acquire().await?;
        let result = execute(&mut conn, &query).await;
        self.pool.release(conn);
        result
    }

    pub async fn update(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<u64> {
        self.execute(sql, params).await
    }

    /// Run an INSERT and return the generated `id`.
    ///
    /// `RETURNING id` is appended unless the statement already returns something.
    pub async fn insert(
        &self,
        sql: &str,
        params: Option<&NamedParams>,
    ) -> DbResult<Option<JsonValue>> {
        let sql = with_returning_id(sql);
        Ok(self.query_one(&sql, params).await?.and_then(returned_id))
    }

    /// Run positional SQL (`$1`, `$2`, ...) without translation.
    pub async fn raw_query(&self, sql: &str, values: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.pool.ensure_ready()?;
        let query = TranslatedQuery {
            sql: sql.to_string(),
            values: values.to_vec(),
        };
        let mut conn = self.pool.acquire().await?;
        let result = fetch_all(&mut conn, &query).await;
        self.pool.release(conn);
        result
    }

    /// Insert many rows with one multi-row INSERT. Returns the affected count.
    pub async fn batch_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        self.pool.ensure_ready()?;
        if rows.is_empty() {
            debug!(table = %table, "Batch insert with no rows, nothing to do");
            return Ok(0);
        }

        let query = build_batch_insert(table, columns, rows)?;
        let mut conn = self.pool.acquire().await?;
        let result = execute(&mut conn, &query).await;
        self.pool.release(conn);
        result
    }

    /// Whether a table with this name exists in any visible schema.
    pub async fn table_exists(&self, name: &str) -> DbResult<bool> {
        let params = crate::named_params! { "table_name" => name };
        let count = self.query_scalar(TABLE_EXISTS_SQL, Some(&params)).await?;
        Ok(count.and_then(|v| v.as_i64()).unwrap_or(0) > 0)
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

/// First value of a row, treating SQL NULL as absent.
pub(crate) fn first_value(row: Row) -> Option<JsonValue> {
    row.into_iter()
        .next()
        .map(|(_, value)| value)
        .filter(|value| !value.is_null())
}

/// The `id` column of a row, treating SQL NULL as absent.
pub(crate) fn returned_id(row: Row) -> Option<JsonValue> {
    row.get("id").filter(|value| !value.is_null()).cloned()
}

// =============================================================================
// Statement Runners
// =============================================================================

/// Run a translated query and decode every row.
///
/// Queries without values go through the simple query protocol, which also
/// accepts several `;`-separated statements.
///
/// The runners return boxed futures so callers holding a `&mut` connection
/// for an arbitrary lifetime (transactions) still get a `Send` future.
pub(crate) fn fetch_all<'a>(
    conn: &'a mut PgConnection,
    query: &'a TranslatedQuery,
) -> BoxFuture<'a, DbResult<Vec<Row>>> {
    Box::pin(async move {
        let start = Instant::now();
        let result = if query.values.is_empty() {
            conn.fetch_all(sqlx::raw_sql(&query.sql)).await
        } else {
            conn.fetch_all(bind_all(&query.sql, &query.values)).await
        };

        match result {
            Ok(rows) => {
                debug!(
                    sql = %query.sql,
                    rows = rows.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query completed"
                );
                Ok(rows.iter().map(RowToJson::to_json_map).collect())
            }
            Err(e) => Err(log_failure(query, e)),
        }
    })
}

/// Run a translated statement and return the affected row count.
pub(crate) fn execute<'a>(
    conn: &'a mut PgConnection,
    query: &'a TranslatedQuery,
) -> BoxFuture<'a, DbResult<u64>> {
    Box::pin(async move {
        let start = Instant::now();
        let result = if query.values.is_empty() {
            conn.execute(sqlx::raw_sql(&query.sql)).await
        } else {
            conn.execute(bind_all(&query.sql, &query.values)).await
        };

        match result {
            Ok(done) => {
                debug!(
                    sql = %query.sql,
                    rows_affected = done.rows_affected(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Statement completed"
                );
                Ok(done.rows_affected())
            }
            Err(e) => Err(log_failure(query, e)),
        }
    })
}

fn log_failure(query: &TranslatedQuery, err: sqlx::Error) -> DbError {
    let err = DbError::from(err);
    error!(
        sql = %query.sql,
        params = ?query.values,
        sql_state = err.sql_state().unwrap_or_default(),
        error = %err,
        "Query failed"
    );
    err
}
