//! Named-parameter translation.
//!
//! Rewrites `:name` placeholders into Postgres positional markers (`$1`, `$2`, ...).
//! Each distinct name gets one slot, numbered in order of first appearance,
//! and every later occurrence of the same name reuses that slot.

use crate::error::{DbError, DbResult};
use crate::models::{NamedParams, QueryParam};
use std::collections::HashMap;

/// SQL text with positional markers plus the values to bind, in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

impl TranslatedQuery {
    /// A query that binds nothing.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }
}

/// Translate named placeholders into positional ones.
///
/// With no mapping (or an empty one) the text is returned untouched. A `::`
/// cast is never read as a placeholder prefix, so `:ts::timestamptz` becomes
/// `$1::timestamptz`. Names in `params` that the text never uses are ignored.
pub fn translate(sql: &str, params: Option<&NamedParams>) -> DbResult<TranslatedQuery> {
    let params = match params {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(TranslatedQuery::plain(sql)),
    };

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut values = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b':') {
            i += 2;
            continue;
        }

        let start = i + 1;
        let end = start
            + bytes[start..]
                .iter()
                .take_while(|b| is_word_byte(**b))
                .count();
        if end == start {
            i += 1;
            continue;
        }

        // ':' and word bytes are ASCII, so these are char boundaries.
        let name = &sql[start..end];
        let index = match slots.get(name) {
            Some(index) => *index,
            None => {
                let value = params.get(name).ok_or_else(|| DbError::translation(name))?;
                values.push(value.clone());
                slots.insert(name, values.len());
                values.len()
            }
        };

        out.push_str(&sql[copied..i]);
        out.push('$');
        out.push_str(&index.to_string());
        copied = end;
        i = end;
    }
    out.push_str(&sql[copied..]);

    Ok(TranslatedQuery { sql: out, values })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
