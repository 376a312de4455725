//! Host protocol behavior without a database.
//!
//! Every call must produce a well-formed response carrying the caller's id
//! and the sentinel for its return type.

use pgbridge::bridge::{Bridge, HostResponse};
use pgbridge::{Database, DbError, PoolSettings, named_params};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;

fn offline_bridge() -> Bridge {
    Bridge::new(Arc::new(Database::new(PoolSettings::default())))
}

async fn call(bridge: &Bridge, request: JsonValue) -> HostResponse {
    bridge.handle_line(&request.to_string()).await
}

#[tokio::test]
async fn test_sentinels_before_initialize() {
    let bridge = offline_bridge();

    let cases = vec![
        (json!({"id": 1, "export": "query", "sql": "SELECT 1"}), JsonValue::Null),
        (json!({"id": 2, "export": "single", "sql": "SELECT 1"}), JsonValue::Null),
        (json!({"id": 3, "export": "scalar", "sql": "SELECT 1"}), JsonValue::Null),
        (json!({"id": 4, "export": "execute", "sql": "DELETE FROM t"}), json!(0)),
        (json!({"id": 5, "export": "update", "sql": "UPDATE t SET a = 1"}), json!(0)),
        (
            json!({"id": 6, "export": "insert", "sql": "INSERT INTO t (a) VALUES (:a)", "params": {"a": 1}}),
            JsonValue::Null,
        ),
        (
            json!({"id": 7, "export": "transaction", "statements": [{"sql": "SELECT 1"}]}),
            JsonValue::Null,
        ),
        (
            json!({"id": 8, "export": "insertBatch", "table": "t", "columns": ["a"], "rows": [[1]]}),
            json!(0),
        ),
        (
            json!({"id": 9, "export": "rawQuery", "sql": "SELECT $1", "values": [1]}),
            JsonValue::Null,
        ),
        (json!({"id": 10, "export": "tableExists", "tableName": "t"}), json!(false)),
        (json!({"id": 11, "export": "isReady"}), json!(false)),
        (json!({"id": 12, "export": "getPoolInfo"}), JsonValue::Null),
    ];

    for (request, expected) in cases {
        let id = request["id"].clone();
        let response = call(&bridge, request).await;
        assert_eq!(response.id, id);
        assert_eq!(response.result, expected, "call {}", id);
    }
}

#[tokio::test]
async fn test_malformed_lines_get_null_results() {
    let bridge = offline_bridge();

    let response = bridge.handle_line("not json").await;
    assert_eq!(response.id, JsonValue::Null);
    assert_eq!(response.result, JsonValue::Null);

    let response = call(&bridge, json!({"id": "abc", "export": "noSuchExport"})).await;
    assert_eq!(response.id, json!("abc"));
    assert_eq!(response.result, JsonValue::Null);

    let response = call(&bridge, json!({"id": 4, "export": "query"})).await;
    assert_eq!(response.id, json!(4));
    assert_eq!(response.result, JsonValue::Null);
}

#[tokio::test]
async fn test_database_errors_before_initialize() {
    let db = Database::new(PoolSettings::default());
    assert!(!db.is_ready());
    assert!(db.pool_info().await.is_none());

    let params = named_params! { "id" => 1 };
    let result = db.query("SELECT :id", Some(&params)).await;
    tokio_test::assert_err!(&result);
    assert!(matches!(result, Err(DbError::NotReady { .. })));

    let result = db
        .transaction(|tx| Box::pin(async move { tx.execute("SELECT 1", None).await }))
        .await;
    assert!(matches!(result, Err(DbError::NotReady { .. })));

    // Empty batches still report that the pool is down.
    let result = db.insert_batch("t", &["a".to_string()], &[]).await;
    assert!(matches!(result, Err(DbError::NotReady { .. })));
}

#[tokio::test]
async fn test_from_store_reads_host_settings() {
    let store: HashMap<String, String> = [
        ("db_host", "db.internal"),
        ("db_port", "6543"),
        ("db_name", "app"),
        ("db_max_connections", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let db = Database::from_store(&store);
    let settings = db.settings();
    assert_eq!(settings.host, "db.internal");
    assert_eq!(settings.port, 6543);
    assert_eq!(settings.database, "app");
    assert_eq!(settings.max_connections, 5);
    assert!(!db.is_ready());

    db.shutdown().await;
    db.shutdown().await;
    assert!(!db.is_ready());
}
