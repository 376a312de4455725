//! Postgres type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies a column's Postgres type name
//! 2. A per-category decoder turns the column value into JSON
//!
//! Anything unrecognised is read raw: valid UTF-8 becomes a string,
//! other bytes become base64.

use crate::models::Row;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::types::Uuid;
use sqlx::{Column, Decode, Postgres, Row as _, Type, TypeInfo, ValueRef};
use tracing::warn;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    TextArray,
    IntegerArray,
    BigIntArray,
    Unknown,
}

/// Classify a Postgres type name (as reported by sqlx) into a category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_ascii_uppercase().as_str() {
        "INT2" => TypeCategory::SmallInt,
        "INT4" => TypeCategory::Integer,
        "INT8" => TypeCategory::BigInt,
        "FLOAT4" => TypeCategory::Float,
        "FLOAT8" => TypeCategory::Double,
        "NUMERIC" => TypeCategory::Decimal,
        "BOOL" => TypeCategory::Boolean,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "UNKNOWN" => TypeCategory::Text,
        "BYTEA" => TypeCategory::Binary,
        "JSON" | "JSONB" => TypeCategory::Json,
        "UUID" => TypeCategory::Uuid,
        "TIMESTAMP" => TypeCategory::Timestamp,
        "TIMESTAMPTZ" => TypeCategory::TimestampTz,
        "DATE" => TypeCategory::Date,
        "TIME" => TypeCategory::Time,
        "TEXT[]" | "VARCHAR[]" => TypeCategory::TextArray,
        "INT4[]" => TypeCategory::IntegerArray,
        "INT8[]" => TypeCategory::BigIntArray,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// NUMERIC rendered as its exact decimal string.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("numeric")
    }
}

impl<'r> Decode<'r, Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary NUMERIC wire format (base-10000 digit groups) as text.
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let read = |at: usize| -> Result<u16, BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read(0)? as usize;
    let weight = read(2)? as i16 as i64;
    let sign = read(4)?;
    let dscale = read(6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + i * 2))
        .collect::<Result<Vec<u16>, _>>()?;
    // Group k carries the power 10000^(weight - k).
    let group = |k: i64| -> u16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for k in 1..=weight {
            out.push_str(&format!("{:04}", group(k)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(k)));
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary data as a base64 JSON string.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }
}

// =============================================================================
// Column Decoders
// =============================================================================

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::SmallInt => get::<i16>(row, idx).map(JsonValue::from),
        TypeCategory::Integer => get::<i32>(row, idx).map(JsonValue::from),
        TypeCategory::BigInt => get::<i64>(row, idx).map(JsonValue::from),
        TypeCategory::Float => get::<f32>(row, idx).map(|v| float_value(v.into())),
        TypeCategory::Double => get::<f64>(row, idx).map(float_value),
        TypeCategory::Decimal => get::<RawDecimal>(row, idx).map(|v| JsonValue::String(v.0)),
        TypeCategory::Boolean => get::<bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Text => get::<String>(row, idx).map(JsonValue::String),
        TypeCategory::Binary => get::<Vec<u8>>(row, idx).map(|v| decode_binary_value(&v)),
        TypeCategory::Json => get::<JsonValue>(row, idx),
        TypeCategory::Uuid => get::<Uuid>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Timestamp => get::<NaiveDateTime>(row, idx)
            .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        TypeCategory::TimestampTz => {
            get::<DateTime<Utc>>(row, idx).map(|v| JsonValue::String(v.to_rfc3339()))
        }
        TypeCategory::Date => get::<NaiveDate>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Time => get::<NaiveTime>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::TextArray => get::<Vec<Option<String>>>(row, idx).map(JsonValue::from),
        TypeCategory::IntegerArray => get::<Vec<Option<i32>>>(row, idx).map(JsonValue::from),
        TypeCategory::BigIntArray => get::<Vec<Option<i64>>>(row, idx).map(JsonValue::from),
        TypeCategory::Unknown => decode_raw(row, idx),
    };
    value.unwrap_or(JsonValue::Null)
}

/// Decode a nullable column, logging (not failing) on type mismatches.
fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(value) => value,
        Err(e) => {
            warn!(column = idx, error = %e, "Failed to decode column");
            None
        }
    }
}

fn decode_raw(row: &PgRow, idx: usize) -> Option<JsonValue> {
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(column = idx, error = %e, "Failed to read column");
            return None;
        }
    };
    if raw.is_null() {
        return None;
    }
    let bytes = raw.as_bytes().ok()?;
    Some(match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => decode_binary_value(bytes),
    })
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}
