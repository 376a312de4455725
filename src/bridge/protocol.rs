//! Host wire protocol.
//!
//! One JSON object per line:
//!
//! ```text
//! {"id": 7, "export": "query", "sql": "SELECT * FROM players WHERE id = :id", "params": {"id": 3}}
//! ```
//!
//! answered by `{"id": 7, "result": [...]}`.
//!
//! Parameter values bind with a fixed type: JSON strings go out as `text`,
//! numbers as `int8` or `float8`, booleans as `bool`, objects and arrays as
//! `jsonb`. Where the column is not text and the server cannot infer
//! otherwise, cast in the SQL, e.g. `:at::timestamptz`, `:key::uuid` or
//! `:doc::jsonb`. `null` is sent untyped and takes its type from context.
//! Binary values use `{"$bytes": "<base64>"}` and timestamps may use
//! `{"$timestamp": "<rfc3339>"}`, which bind without a cast.

use crate::models::{NamedParams, QueryParam};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One host call. `id` is echoed back untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct HostRequest {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(flatten)]
    pub call: ExportCall,
}

/// The exported operations, selected by the `export` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "export", rename_all = "camelCase")]
pub enum ExportCall {
    Query {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Single {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Scalar {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Execute {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Insert {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Update {
        sql: String,
        #[serde(default)]
        params: Option<NamedParams>,
    },
    Transaction {
        statements: Vec<Statement>,
    },
    InsertBatch {
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        rows: Vec<Vec<QueryParam>>,
    },
    RawQuery {
        sql: String,
        #[serde(default)]
        values: Vec<QueryParam>,
    },
    TableExists {
        #[serde(rename = "tableName")]
        table_name: String,
    },
    IsReady,
    GetPoolInfo,
}

impl ExportCall {
    /// Export name as the host spells it, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Single { .. } => "single",
            Self::Scalar { .. } => "scalar",
            Self::Execute { .. } => "execute",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Transaction { .. } => "transaction",
            Self::InsertBatch { .. } => "insertBatch",
            Self::RawQuery { .. } => "rawQuery",
            Self::TableExists { .. } => "tableExists",
            Self::IsReady => "isReady",
            Self::GetPoolInfo => "getPoolInfo",
        }
    }
}

/// One statement of a host transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Option<NamedParams>,
    #[serde(default)]
    pub mode: StatementMode,
}

/// What a transaction statement reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementMode {
    /// All rows
    #[default]
    Rows,
    /// First row or null
    Single,
    /// First value of the first row or null
    Scalar,
    /// Affected row count
    Execute,
    /// Generated id or null
    Insert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostResponse {
    pub id: JsonValue,
    pub result: JsonValue,
}

impl HostResponse {
    pub fn new(id: JsonValue, result: JsonValue) -> Self {
        Self { id, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: JsonValue) -> HostRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_param_strings_stay_text() {
        let req = parse(json!({
            "export": "execute",
            "sql": "UPDATE t SET at = :at::timestamptz, seen = :seen",
            "params": {
                "at": "2024-01-02T03:04:05Z",
                "seen": {"$timestamp": "2024-01-02T03:04:05Z"}
            }
        }));
        let ExportCall::Execute { params: Some(params), .. } = req.call else {
            panic!("expected an execute call with params");
        };
        assert_eq!(
            params["at"],
            QueryParam::String("2024-01-02T03:04:05Z".to_string())
        );
        assert!(matches!(params["seen"], QueryParam::Timestamp(_)));
    }

    #[test]
    fn test_parse_query_with_params() {
        let req = parse(json!({
            "id": "abc",
            "export": "query",
            "sql": "SELECT * FROM players WHERE id = :id",
            "params": {"id": 3}
        }));
        assert_eq!(req.id, json!("abc"));
        match req.call {
            ExportCall::Query { sql, params } => {
                assert!(sql.contains(":id"));
                assert_eq!(params.unwrap()["id"], QueryParam::Int(3));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_params_are_optional() {
        let req = parse(json!({"id": 1, "export": "execute", "sql": "VACUUM"}));
        assert!(matches!(req.call, ExportCall::Execute { params: None, .. }));

        let req = parse(json!({"id": 1, "export": "update", "sql": "x", "params": null}));
        assert!(matches!(req.call, ExportCall::Update { params: None, .. }));
    }

    #[test]
    fn test_parse_camel_case_exports() {
        let req = parse(json!({"id": 2, "export": "tableExists", "tableName": "players"}));
        assert!(matches!(req.call, ExportCall::TableExists { ref table_name } if table_name == "players"));

        let req = parse(json!({"id": 3, "export": "getPoolInfo"}));
        assert!(matches!(req.call, ExportCall::GetPoolInfo));
        assert_eq!(req.call.name(), "getPoolInfo");

        let req = parse(json!({
            "id": 4,
            "export": "insertBatch",
            "table": "items",
            "columns": ["name", "qty"],
            "rows": [["a", 1], ["b", {"$bytes": "AA=="}]]
        }));
        match req.call {
            ExportCall::InsertBatch { rows, .. } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1][1], QueryParam::Bytes(vec![0]));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_parse_transaction_statements() {
        let req = parse(json!({
            "id": 5,
            "export": "transaction",
            "statements": [
                {"sql": "INSERT INTO t (a) VALUES (:a)", "params": {"a": 1}, "mode": "insert"},
                {"sql": "SELECT count(*) FROM t"}
            ]
        }));
        match req.call {
            ExportCall::Transaction { statements } => {
                assert_eq!(statements[0].mode, StatementMode::Insert);
                assert_eq!(statements[1].mode, StatementMode::Rows);
                assert!(statements[1].params.is_none());
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_missing_id_defaults_to_null() {
        let req = parse(json!({"export": "isReady"}));
        assert!(req.id.is_null());
    }

    #[test]
    fn test_unknown_export_is_rejected() {
        let result = serde_json::from_value::<HostRequest>(json!({"id": 1, "export": "dropAll"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_serialization() {
        let response = HostResponse::new(json!(9), json!([{"id": 1}]));
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"id":9,"result":[{"id":1}]}"#
        );
    }
}
