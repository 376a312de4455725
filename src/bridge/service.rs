//! Host-facing operations.
//!
//! Every operation here swallows core errors: the failure is logged and the
//! host gets the operation's sentinel (`null`, `0` or `false`) instead.

use crate::bridge::protocol::{ExportCall, HostRequest, HostResponse, Statement, StatementMode};
use crate::db::{Database, TxConnection};
use crate::error::{DbError, DbResult};
use crate::models::{NamedParams, PoolInfo, QueryParam, Row};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Adapter between host calls and the database service.
#[derive(Debug, Clone)]
pub struct Bridge {
    db: Arc<Database>,
}

impl Bridge {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn query(&self, sql: &str, params: Option<&NamedParams>) -> Option<Vec<Row>> {
        sentinel("query", self.db.query(sql, params).await.map(Some), None)
    }

    pub async fn single(&self, sql: &str, params: Option<&NamedParams>) -> Option<Row> {
        sentinel("single", self.db.single(sql, params).await, None)
    }

    pub async fn scalar(&self, sql: &str, params: Option<&NamedParams>) -> Option<JsonValue> {
        sentinel("scalar", self.db.scalar(sql, params).await, None)
    }

    pub async fn execute(&self, sql: &str, params: Option<&NamedParams>) -> u64 {
        sentinel("execute", self.db.execute(sql, params).await, 0)
    }

    pub async fn insert(&self, sql: &str, params: Option<&NamedParams>) -> Option<JsonValue> {
        sentinel("insert", self.db.insert(sql, params).await, None)
    }

    pub async fn update(&self, sql: &str, params: Option<&NamedParams>) -> u64 {
        sentinel("update", self.db.update(sql, params).await, 0)
    }

    /// Run `statements` in order inside one transaction.
    ///
    /// Returns one result per statement, shaped by its mode, or `None` if the
    /// transaction was rolled back.
    pub async fn transaction(&self, statements: Vec<Statement>) -> Option<Vec<JsonValue>> {
        let result = self
            .db
            .transaction(move |tx| Box::pin(run_statements(tx, statements)))
            .await;
        sentinel("transaction", result.map(Some), None)
    }

    pub async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<QueryParam>],
    ) -> u64 {
        sentinel(
            "insertBatch",
            self.db.insert_batch(table, columns, rows).await,
            0,
        )
    }

    pub async fn raw_query(&self, sql: &str, values: &[QueryParam]) -> Option<Vec<Row>> {
        sentinel("rawQuery", self.db.raw_query(sql, values).await.map(Some), None)
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        sentinel("tableExists", self.db.table_exists(name).await, false)
    }

    pub fn is_ready(&self) -> bool {
        self.db.is_ready()
    }

    pub async fn pool_info(&self) -> Option<PoolInfo> {
        self.db.pool_info().await
    }

    /// Run one host call and return its JSON result.
    pub async fn dispatch(&self, call: ExportCall) -> JsonValue {
        debug!(export = call.name(), "Dispatching host call");
        match call {
            ExportCall::Query { sql, params } => to_json(self.query(&sql, params.as_ref()).await),
            ExportCall::Single { sql, params } => to_json(self.single(&sql, params.as_ref()).await),
            ExportCall::Scalar { sql, params } => {
                to_json(self.scalar(&sql, params.as_ref()).await)
            }
            ExportCall::Execute { sql, params } => {
                to_json(self.execute(&sql, params.as_ref()).await)
            }
            ExportCall::Insert { sql, params } => to_json(self.insert(&sql, params.as_ref()).await),
            ExportCall::Update { sql, params } => to_json(self.update(&sql, params.as_ref()).await),
            ExportCall::Transaction { statements } => to_json(self.transaction(statements).await),
            ExportCall::InsertBatch {
                table,
                columns,
                rows,
            } => to_json(self.insert_batch(&table, &columns, &rows).await),
            ExportCall::RawQuery { sql, values } => to_json(self.raw_query(&sql, &values).await),
            ExportCall::TableExists { table_name } => {
                to_json(self.table_exists(&table_name).await)
            }
            ExportCall::IsReady => to_json(self.is_ready()),
            ExportCall::GetPoolInfo => to_json(self.pool_info().await),
        }
    }

    /// Handle one protocol line and produce the response.
    ///
    /// Lines that are not a valid call get a `null` result. The `id` is kept
    /// when the line is at least valid JSON.
    pub async fn handle_line(&self, line: &str) -> HostResponse {
        match serde_json::from_str::<HostRequest>(line) {
            Ok(request) => HostResponse::new(request.id, self.dispatch(request.call).await),
            Err(e) => {
                let id = serde_json::from_str::<JsonValue>(line)
                    .ok()
                    .and_then(|mut v| v.get_mut("id").map(JsonValue::take))
                    .unwrap_or(JsonValue::Null);
                warn!(error = %e, id = %id, "Ignoring malformed host call");
                HostResponse::new(id, JsonValue::Null)
            }
        }
    }
}

async fn run_statements(
    tx: &mut TxConnection,
    statements: Vec<Statement>,
) -> DbResult<Vec<JsonValue>> {
    let mut results = Vec::with_capacity(statements.len());
    for statement in &statements {
        let params = statement.params.as_ref();
        let sql = statement.sql.as_str();
        let value = match statement.mode {
            StatementMode::Rows => to_json(tx.query(sql, params).await?),
            StatementMode::Single => to_json(tx.single(sql, params).await?),
            StatementMode::Scalar => to_json(tx.scalar(sql, params).await?),
            StatementMode::Execute => to_json(tx.execute(sql, params).await?),
            StatementMode::Insert => to_json(tx.insert(sql, params).await?),
        };
        results.push(value);
    }
    Ok(results)
}

/// Unwrap a core result, logging the failure and substituting the sentinel.
fn sentinel<T>(export: &str, result: DbResult<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log_failure(export, &e);
            fallback
        }
    }
}

fn log_failure(export: &str, err: &DbError) {
    error!(
        export = export,
        error = %err,
        suggestion = err.suggestion().unwrap_or_default(),
        retryable = err.is_retryable(),
        "Database call failed"
    );
}

fn to_json<T: serde::Serialize>(value: T) -> JsonValue {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize result");
        JsonValue::Null
    })
}
