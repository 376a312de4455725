//! SQL text builders shared by the executor and the transaction handle.

use crate::db::translate::TranslatedQuery;
use crate::error::{DbError, DbResult};
use crate::models::{MAX_BIND_PARAMS, QueryParam};
use std::borrow::Cow;

/// Append `RETURNING id` unless the statement already has a RETURNING clause.
pub fn with_returning_id(sql: &str) -> Cow<'_, str> {
    if sql.to_lowercase().contains("returning") {
        return Cow::Borrowed(sql);
    }
    let body = sql.trim_end().trim_end_matches(';').trim_end();
    Cow::Owned(format!("{body} RETURNING id"))
}

/// Check a table or column name: `[A-Za-z_][A-Za-z0-9_$]*`, optionally dot-qualified.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

/// Build one multi-row INSERT with consecutive positional markers.
///
/// Shape problems are reported before anything is sent to the server.
pub fn build_batch_insert(
    table: &str,
    columns: &[String],
    rows: &[Vec<QueryParam>],
) -> DbResult<TranslatedQuery> {
    validate_identifier(table)?;
    if columns.is_empty() {
        return Err(DbError::invalid_input("batch insert needs at least one column"));
    }
    for column in columns {
        validate_identifier(column)?;
    }
    if let Some((index, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns.len())
    {
        return Err(DbError::invalid_input(format!(
            "row {index} has {} values, expected {}",
            row.len(),
            columns.len()
        )));
    }

    let bind_count = columns.len() * rows.len();
    if bind_count > MAX_BIND_PARAMS {
        return Err(DbError::invalid_input(format!(
            "batch insert binds {bind_count} values, the limit is {MAX_BIND_PARAMS}"
        )));
    }

    let groups: Vec<String> = (0..rows.len())
        .map(|r| {
            let markers: Vec<String> = (1..=columns.len())
                .map(|c| format!("${}", r * columns.len() + c))
                .collect();
            format!("({})", markers.join(", "))
        })
        .collect();

    Ok(TranslatedQuery {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES {}",
            columns.join(", "),
            groups.join(", ")
        ),
        values: rows.iter().flatten().cloned().collect(),
    })
}
