//! Query-related data models.
//!
//! This module defines parameter values, named parameter maps and result rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Postgres accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Parameter values keyed by placeholder name (without the leading `:`).
pub type NamedParams = HashMap<String, QueryParam>;

/// One result row: column name to value, in server column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
///
/// On the JSON wire, null/bool/number/string map to the obvious variants,
/// `{"$bytes": "<base64>"}` is binary data, `{"$timestamp": "<RFC 3339>"}`
/// is a timestamp and any other array or object is bound as `jsonb`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireParam", into = "WireParam")]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Point in time, bound as `timestamptz`
    Timestamp(DateTime<Utc>),
    /// Structured value, bound as `jsonb`
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// JSON representation of `QueryParam`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes {
        #[serde(rename = "$bytes", with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    Timestamp {
        #[serde(rename = "$timestamp")]
        timestamp: DateTime<Utc>,
    },
    Json(JsonValue),
}

impl From<WireParam> for QueryParam {
    fn from(wire: WireParam) -> Self {
        match wire {
            WireParam::Null => Self::Null,
            WireParam::Bool(v) => Self::Bool(v),
            WireParam::Int(v) => Self::Int(v),
            WireParam::Float(v) => Self::Float(v),
            WireParam::String(v) => Self::String(v),
            WireParam::Bytes { bytes } => Self::Bytes(bytes),
            WireParam::Timestamp { timestamp } => Self::Timestamp(timestamp),
            WireParam::Json(v) => Self::Json(v),
        }
    }
}

impl From<QueryParam> for WireParam {
    fn from(param: QueryParam) -> Self {
        match param {
            QueryParam::Null => Self::Null,
            QueryParam::Bool(v) => Self::Bool(v),
            QueryParam::Int(v) => Self::Int(v),
            QueryParam::Float(v) => Self::Float(v),
            QueryParam::String(v) => Self::String(v),
            QueryParam::Bytes(bytes) => Self::Bytes { bytes },
            QueryParam::Timestamp(timestamp) => Self::Timestamp { timestamp },
            QueryParam::Json(v) => Self::Json(v),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    /// Open connections, idle or in use
    pub total: u32,
    /// Open connections not currently handed out
    pub idle: usize,
    /// Callers currently waiting for a connection
    pub waiting: usize,
}
