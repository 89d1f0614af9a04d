//! Query templates and SQL literal rendering
//!
//! Query text lives in external `.sql` files with `$UPPER_CASE` placeholder
//! tokens; [`QueryTemplate`] loads a file and substitutes the tokens before
//! execution. [`SqlLiteral`] renders Rust values as SQL literals (strings
//! quoted and escaped, numbers bare) and [`sql_list`] builds IN-list
//! fragments from slices.

use std::path::Path;

use crate::error::{Error, Result};

/// Render a value as a SQL literal.
///
/// Numbers render bare; strings render single-quoted with `''` escaping, the
/// standard SQL escape for quoted literals.
pub trait SqlLiteral {
    /// The literal SQL text for this value
    fn to_sql_literal(&self) -> String;
}

macro_rules! impl_sql_literal_display {
    ($($ty:ty),*) => {
        $(impl SqlLiteral for $ty {
            fn to_sql_literal(&self) -> String {
                self.to_string()
            }
        })*
    };
}

impl_sql_literal_display!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl SqlLiteral for &str {
    fn to_sql_literal(&self) -> String {
        quote_literal(self)
    }
}

impl SqlLiteral for String {
    fn to_sql_literal(&self) -> String {
        quote_literal(self)
    }
}

impl SqlLiteral for chrono::NaiveDate {
    fn to_sql_literal(&self) -> String {
        format!("'{}'", self.format("%Y-%m-%d"))
    }
}

/// Quote a string for a SQL literal context, escaping embedded quotes
pub fn quote_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a slice as a comma-separated SQL list, e.g. for `IN (...)`.
///
/// Integers and floats join bare (`1,2,3`), strings join quoted
/// (`'a','b','c'`).
pub fn sql_list<T: SqlLiteral>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_sql_literal())
        .collect::<Vec<_>>()
        .join(",")
}

/// A SQL query with `$TOKEN` placeholders.
///
/// Tokens are `$` followed by an uppercase identifier (`$IDS`,
/// `$START_DATE`). [`render`](Self::render) fails if any token is left
/// unbound, so a forgotten substitution surfaces before the query reaches
/// the server. Dollar-quoted strings (`$$...$$`) and positional parameters
/// (`$1`) do not match the token shape and pass through untouched.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    sql: String,
}

impl QueryTemplate {
    /// Load a template from an external SQL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path).map_err(|e| {
            Error::template(format!("failed to read query file {}: {e}", path.display()))
        })?;
        Ok(Self { sql })
    }

    /// Create a template from an in-memory string
    pub fn from_sql(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// Replace every occurrence of `token` with a rendered SQL literal
    pub fn bind(self, token: &str, value: impl SqlLiteral) -> Self {
        self.bind_raw(token, &value.to_sql_literal())
    }

    /// Replace every occurrence of `token` with a raw SQL fragment.
    ///
    /// Use for fragments that are already SQL, such as [`sql_list`] output.
    pub fn bind_raw(mut self, token: &str, fragment: &str) -> Self {
        self.sql = self.sql.replace(token, fragment);
        self
    }

    /// Replace every occurrence of `token` with a quoted list
    pub fn bind_list<T: SqlLiteral>(self, token: &str, items: &[T]) -> Self {
        self.bind_raw(token, &sql_list(items))
    }

    /// Bind the conventional `$START_DATE` / `$END_DATE` tokens as quoted
    /// date literals
    pub fn bind_date_range(self, start: &str, end: &str) -> Self {
        self.bind_raw("$START_DATE", &quote_literal(start))
            .bind_raw("$END_DATE", &quote_literal(end))
    }

    /// The current (possibly partially substituted) SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Finish substitution, failing if any `$TOKEN` placeholder remains
    pub fn render(self) -> Result<String> {
        let leftover = leftover_tokens(&self.sql);
        if !leftover.is_empty() {
            return Err(Error::template(format!(
                "unbound placeholder tokens: {}",
                leftover.join(", ")
            )));
        }
        Ok(self.sql)
    }
}

/// Scan for `$UPPERCASE` tokens that were never substituted
fn leftover_tokens(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_uppercase()
                    || bytes[end] == b'_'
                    || (end > start && bytes[end].is_ascii_digit()))
            {
                end += 1;
            }
            // Require an uppercase first character so `$1` and `$$` pass.
            if end > start && bytes[start].is_ascii_uppercase() {
                let token = format!("${}", &sql[start..end]);
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    tokens
}

/// Apply a row limit to a finished query.
///
/// Queries ending in `FOR READ ONLY` get the limit spliced in front of that
/// clause; otherwise the limit is appended.
pub fn apply_row_limit(sql: &str, limit: u64) -> String {
    const READ_ONLY: &str = "FOR READ ONLY";
    let limit_clause = format!("LIMIT {limit}");
    if sql.contains(READ_ONLY) {
        sql.replace(READ_ONLY, &format!("{limit_clause} {READ_ONLY}"))
    } else {
        format!("{} {limit_clause}", sql.trim_end())
    }
}
