//! Conversion between vendor rows and typed polars frames.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::Deserialize;

use crate::tables::parse_date;

static NULL: serde_json::Value = serde_json::Value::Null;

/// Column metadata as advertised by the datatables API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ApiColumn {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Local storage type for a vendor column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    Float,
    Integer,
    Boolean,
    Text,
}

impl ColumnKind {
    /// Map vendor type names such as `BigDecimal(34,12)` or `Integer`.
    pub fn from_api(kind: &str) -> Self {
        let lower = kind.trim().to_lowercase();
        if lower == "date" || lower.starts_with("datetime") {
            Self::Date
        } else if lower.starts_with("bigdecimal")
            || lower.starts_with("double")
            || lower.starts_with("float")
            || lower.starts_with("decimal")
        {
            Self::Float
        } else if lower.starts_with("integer") || lower.starts_with("biginteger") || lower == "long"
        {
            Self::Integer
        } else if lower.starts_with("bool") {
            Self::Boolean
        } else {
            Self::Text
        }
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "y" | "1" => Some(true),
            "false" | "f" | "n" | "0" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

/// Build a typed `DataFrame` from the column list and row arrays of one or
/// more API pages.
///
/// Date columns arrive as `YYYY-MM-DD` strings (or longer timestamps) and
/// are parsed to `Date`. Rows shorter than the column list are padded with
/// nulls. Only eager operations are used, so this is safe to call from an
/// async task.
pub fn build_frame(
    columns: &[ApiColumn],
    rows: &[Vec<serde_json::Value>],
) -> PolarsResult<DataFrame> {
    let n = rows.len();

    let built = columns
        .iter()
        .enumerate()
        .map(|(i, api_col)| {
            let name = api_col.name.as_str();
            let cells = rows.iter().map(|row| row.get(i).unwrap_or(&NULL));
            match ColumnKind::from_api(&api_col.kind) {
                ColumnKind::Float => {
                    let values: Vec<Option<f64>> = cells.map(value_as_f64).collect();
                    Ok(Column::new(name.into(), values))
                }
                ColumnKind::Integer => {
                    let values: Vec<Option<i64>> = cells.map(value_as_i64).collect();
                    Ok(Column::new(name.into(), values))
                }
                ColumnKind::Boolean => {
                    let values: Vec<Option<bool>> = cells.map(value_as_bool).collect();
                    Ok(Column::new(name.into(), values))
                }
                ColumnKind::Date => {
                    let days: Vec<Option<i32>> = cells
                        .map(|v| {
                            value_as_string(v)
                                .as_deref()
                                .and_then(parse_date)
                                .map(days_from_date)
                        })
                        .collect();
                    Column::new(name.into(), days).cast(&DataType::Date)
                }
                ColumnKind::Text => {
                    let values: Vec<Option<String>> = cells.map(value_as_string).collect();
                    Ok(Column::new(name.into(), values))
                }
            }
        })
        .collect::<PolarsResult<Vec<Column>>>()?;

    DataFrame::new(n, built)
}

/// Render a frame as CSV bytes.
pub fn render_csv(df: &mut DataFrame, include_header: bool) -> PolarsResult<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(include_header)
        .finish(df)?;
    Ok(buf)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

/// Days since the Unix epoch, the physical value of a polars `Date`.
pub fn days_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - 719_163
}

/// Convert a polars `Date` (days since the Unix epoch) to a `NaiveDate`.
pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + 719_163)
}

/// Min and max of a date column, formatted as `YYYY-MM-DD`.
pub fn date_range(df: &DataFrame, column: &str) -> (Option<String>, Option<String>) {
    let Ok(c) = df.column(column) else {
        return (None, None);
    };

    let format_scalar = |s: Scalar| -> Option<String> {
        match s.value() {
            AnyValue::Date(days) => {
                date_from_days(*days).map(|d| d.format("%Y-%m-%d").to_string())
            }
            AnyValue::Null => None,
            other => Some(format!("{other}")),
        }
    };

    let min = c.min_reduce().ok().and_then(format_scalar);
    let max = c.max_reduce().ok().and_then(format_scalar);
    (min, max)
}

/// First and last `rows` rows, for printing.
pub fn preview(df: &DataFrame, rows: usize) -> (DataFrame, DataFrame) {
    (df.head(Some(rows)), df.tail(Some(rows)))
}
