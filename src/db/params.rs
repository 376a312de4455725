//! Parameter binding for Postgres queries.
//!
//! NULL is sent with an unspecified type (OID 0) so the server infers it from
//! context, the same way it would for a NULL literal in that position.

use crate::models::QueryParam;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Encode, Postgres, Type};

/// A NULL whose type is left for the server to infer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(UntypedNull),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Timestamp(v) => query.bind(*v),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Build a query with every value bound in order.
pub(crate) fn bind_all<'q>(
    sql: &'q str,
    values: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    values.iter().fold(sqlx::query(sql), bind_param)
}
