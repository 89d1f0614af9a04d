//! Row-to-dataframe materialization
//!
//! Builders that turn tokio-postgres results into polars dataframes:
//!
//! - [`from_binary_rows`]: typed columns keyed on the Postgres column types
//!   (binary protocol). Strict: an unsupported column type or a value that
//!   fails extraction fails the whole build.
//! - [`from_text_columns`]: columns of text-protocol strings, optionally
//!   with per-column dtype inference.
//!
//! The strategy sequencing that chooses between them lives in
//! [`crate::fetch`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSqlOwned, Type};
use tokio_postgres::{Column, Row, SimpleQueryMessage};

use crate::error::{Error, Result};

/// Build a dataframe from binary-protocol rows with their column metadata.
///
/// The column slice comes from the prepared statement, so an empty result
/// set still yields a dataframe with the right column names.
pub fn from_binary_rows(columns: &[Column], rows: &[Row]) -> Result<DataFrame> {
    let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    let names = dedupe_column_names(&names);

    let mut series = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        series.push(typed_series(&names[idx], idx, column.type_(), rows)?);
    }
    Ok(DataFrame::new(series)?)
}

fn typed_series(name: &str, idx: usize, ty: &Type, rows: &[Row]) -> Result<Series> {
    Ok(match *ty {
        Type::BOOL => Series::new(name, extract::<bool>(name, idx, rows)?),
        Type::CHAR => {
            let values = extract::<i8>(name, idx, rows)?;
            Series::new(name, int_widen(values))
        }
        Type::INT2 => {
            let values = extract::<i16>(name, idx, rows)?;
            Series::new(name, int_widen(values))
        }
        Type::INT4 => Series::new(name, extract::<i32>(name, idx, rows)?),
        Type::INT8 => Series::new(name, extract::<i64>(name, idx, rows)?),
        Type::OID => {
            let values = extract::<u32>(name, idx, rows)?;
            let widened: Vec<Option<i64>> = values
                .into_iter()
                .map(|v| v.map(i64::from))
                .collect();
            Series::new(name, widened)
        }
        Type::FLOAT4 => Series::new(name, extract::<f32>(name, idx, rows)?),
        Type::FLOAT8 => Series::new(name, extract::<f64>(name, idx, rows)?),
        Type::NUMERIC => {
            let values = extract::<Decimal>(name, idx, rows)?;
            let floats: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| match v {
                    Some(d) => d.to_f64().map(Some).ok_or_else(|| {
                        Error::type_conversion(format!(
                            "column '{name}': numeric value {d} not representable as f64"
                        ))
                    }),
                    None => Ok(None),
                })
                .collect::<Result<_>>()?;
            Series::new(name, floats)
        }
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            Series::new(name, extract::<String>(name, idx, rows)?)
        }
        Type::BYTEA => Series::new(name, extract::<Vec<u8>>(name, idx, rows)?),
        Type::DATE => Series::new(name, extract::<NaiveDate>(name, idx, rows)?),
        Type::TIME => Series::new(name, extract::<NaiveTime>(name, idx, rows)?),
        Type::TIMESTAMP => Series::new(name, extract::<NaiveDateTime>(name, idx, rows)?),
        Type::TIMESTAMPTZ => {
            // Stored as UTC; the session offset is discarded.
            let values = extract::<chrono::DateTime<chrono::Utc>>(name, idx, rows)?;
            let naive: Vec<Option<NaiveDateTime>> =
                values.into_iter().map(|v| v.map(|dt| dt.naive_utc())).collect();
            Series::new(name, naive)
        }
        Type::UUID => {
            let values = extract::<uuid::Uuid>(name, idx, rows)?;
            let strings: Vec<Option<String>> =
                values.into_iter().map(|v| v.map(|u| u.to_string())).collect();
            Series::new(name, strings)
        }
        Type::JSON | Type::JSONB => {
            let values = extract::<serde_json::Value>(name, idx, rows)?;
            let strings: Vec<Option<String>> =
                values.into_iter().map(|v| v.map(|j| j.to_string())).collect();
            Series::new(name, strings)
        }
        ref other => {
            return Err(Error::type_conversion(format!(
                "unsupported column type {other} for column '{name}'"
            )))
        }
    })
}

fn extract<T: FromSqlOwned>(name: &str, idx: usize, rows: &[Row]) -> Result<Vec<Option<T>>> {
    rows.iter()
        .map(|row| {
            row.try_get::<_, Option<T>>(idx)
                .map_err(|e| Error::type_conversion(format!("column '{name}': {e}")))
        })
        .collect()
}

fn int_widen<T: Into<i32>>(values: Vec<Option<T>>) -> Vec<Option<i32>> {
    values.into_iter().map(|v| v.map(Into::into)).collect()
}

/// Split text-protocol messages into column names and per-column values.
///
/// Uses the row description when the server sends one, so empty result sets
/// keep their column names.
pub fn text_messages_to_columns(
    messages: &[SimpleQueryMessage],
) -> Result<(Vec<String>, Vec<Vec<Option<String>>>)> {
    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<Option<String>>> = Vec::new();

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) => {
                if names.is_empty() {
                    names = description.iter().map(|c| c.name().to_string()).collect();
                    columns = vec![Vec::new(); names.len()];
                }
            }
            SimpleQueryMessage::Row(row) => {
                if names.is_empty() {
                    names = row.columns().iter().map(|c| c.name().to_string()).collect();
                    columns = vec![Vec::new(); names.len()];
                }
                for (idx, column) in columns.iter_mut().enumerate() {
                    let value = row
                        .try_get(idx)
                        .map_err(|e| Error::schema(format!("text row read failed: {e}")))?;
                    column.push(value.map(str::to_string));
                }
            }
            _ => {}
        }
    }

    Ok((names, columns))
}

/// Build a dataframe from text-protocol columns.
///
/// With `infer` set, each column is parsed back into the narrowest dtype
/// that fits every non-null value (int, float, bool, date); otherwise every
/// column stays a string column.
pub fn from_text_columns(
    names: Vec<String>,
    columns: Vec<Vec<Option<String>>>,
    infer: bool,
) -> Result<DataFrame> {
    let names = dedupe_column_names(&names);
    let series: Vec<Series> = names
        .iter()
        .zip(columns)
        .map(|(name, values)| {
            if infer {
                infer_series(name, &values)
            } else {
                Series::new(name, values)
            }
        })
        .collect();
    Ok(DataFrame::new(series)?)
}

/// Parse a text column into the narrowest dtype that fits every non-null
/// value. Falls back to a string column.
pub fn infer_series(name: &str, values: &[Option<String>]) -> Series {
    let non_null: Vec<&str> = values.iter().flatten().map(String::as_str).collect();
    if non_null.is_empty() {
        return Series::new(name, values);
    }

    if non_null.iter().all(|v| v.parse::<i64>().is_ok()) {
        let parsed: Vec<Option<i64>> = values
            .iter()
            .map(|v| v.as_deref().map(|s| s.parse().unwrap_or_default()))
            .collect();
        return Series::new(name, parsed);
    }

    if non_null.iter().all(|v| v.parse::<f64>().is_ok()) {
        let parsed: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.as_deref().map(|s| s.parse().unwrap_or_default()))
            .collect();
        return Series::new(name, parsed);
    }

    if non_null
        .iter()
        .all(|v| matches!(*v, "t" | "f" | "true" | "false"))
    {
        let parsed: Vec<Option<bool>> = values
            .iter()
            .map(|v| v.as_deref().map(|s| matches!(s, "t" | "true")))
            .collect();
        return Series::new(name, parsed);
    }

    if non_null
        .iter()
        .all(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok())
    {
        let parsed: Vec<Option<NaiveDate>> = values
            .iter()
            .map(|v| {
                v.as_deref()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            })
            .collect();
        return Series::new(name, parsed);
    }

    Series::new(name, values)
}

/// Make column names unique the way polars requires.
///
/// SQL happily returns duplicate column names (`SELECT a, a FROM t`);
/// repeats get an `_<n>` occurrence suffix.
pub fn dedupe_column_names(names: &[String]) -> Vec<String> {
    let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.as_str()).or_insert(0);
        if *count == 0 {
            result.push(name.clone());
        } else {
            let mut candidate = format!("{name}_{count}");
            while names.iter().any(|n| n == &candidate) || result.contains(&candidate) {
                *count += 1;
                candidate = format!("{name}_{count}");
            }
            result.push(candidate);
        }
        *count += 1;
    }
    result
}
