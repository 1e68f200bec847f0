//! Date formatting of dimensions, per dialect.
//!
//! A dimension with a display `format` is rendered through the dialect's
//! date formatting function, shifted into the request timezone when the
//! column stores an instant:
//!
//! ```text
//! type            postgres                                           sqlite
//! date            TO_CHAR((col AT TIME ZONE INTERVAL '+08:00'), f)   STRFTIME(f, col, '+480 minutes')
//! datetimeNoTz    TO_CHAR(col, f)                                    STRFTIME(f, col)
//! unixTimestamp   TO_CHAR((TO_TIMESTAMP(col) AT TIME ZONE ...), f)   STRFTIME(f, col, 'unixepoch', ...)
//! other           col                                                col
//! ```
//!
//! Formats use `YYYY MM DD hh mm ss` tokens; everything else is copied.

use serde_json::{Map, Value};

use crate::request::utc_offset;
use crate::schema::FieldType;
use crate::sql::{func, lit_str, raw_sql, table_col, Dialect, Expr};

/// What to format.
#[derive(Debug, Clone, Copy)]
pub struct FormatSpec<'a> {
    pub field_type: Option<&'a FieldType>,
    /// Table alias of the column.
    pub table: &'a str,
    pub column: &'a str,
    pub format: &'a str,
    /// Request timezone, e.g. `+08:00`.
    pub timezone: &'a str,
    pub options: &'a Map<String, Value>,
}

/// Precision of a unix timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accuracy {
    Second,
    Millisecond,
}

impl Accuracy {
    fn from_options(options: &Map<String, Value>) -> Self {
        match options.get("accuracy").and_then(Value::as_str) {
            Some("millisecond") => Accuracy::Millisecond,
            _ => Accuracy::Second,
        }
    }
}

/// The dimension expression for `spec` in `dialect`.
pub fn format(dialect: Dialect, spec: &FormatSpec<'_>) -> Expr {
    let column = table_col(spec.table, spec.column);
    let Some(field_type) = spec.field_type else {
        return column;
    };

    let column_sql = column.to_sql(dialect);
    let pattern = convert_format(dialect, spec.format);
    match field_type {
        FieldType::Date => format_instant(dialect, &column_sql, &pattern, offset_minutes(spec.timezone)),
        FieldType::DatetimeNoTz | FieldType::DateOnly | FieldType::Time => {
            format_instant(dialect, &column_sql, &pattern, 0)
        }
        FieldType::UnixTimestamp => {
            let accuracy = Accuracy::from_options(spec.options);
            let instant = from_unix(dialect, &column_sql, accuracy);
            format_instant(dialect, &instant, &pattern, offset_minutes(spec.timezone))
        }
        _ => column,
    }
}

/// Format `instant` (SQL text) with `pattern`, shifted by `offset` minutes.
fn format_instant(dialect: Dialect, instant: &str, pattern: &str, offset: i32) -> Expr {
    match dialect {
        Dialect::Postgres => {
            let shifted = if offset == 0 {
                instant.to_string()
            } else {
                format!("({} AT TIME ZONE INTERVAL '{}')", instant, offset_text(offset))
            };
            func("TO_CHAR", vec![raw_sql(&shifted), lit_str(pattern)])
        }
        Dialect::MySql => {
            let shifted = if offset == 0 {
                instant.to_string()
            } else {
                format!("CONVERT_TZ({}, '+00:00', '{}')", instant, offset_text(offset))
            };
            func("DATE_FORMAT", vec![raw_sql(&shifted), lit_str(pattern)])
        }
        Dialect::Sqlite => {
            let mut args = vec![lit_str(pattern), raw_sql(instant)];
            if offset != 0 {
                args.push(lit_str(&format!("{:+} minutes", offset)));
            }
            func("STRFTIME", args)
        }
        Dialect::DuckDb => {
            let shifted = if offset == 0 {
                instant.to_string()
            } else {
                format!("({} + INTERVAL '{} minutes')", instant, offset)
            };
            func("STRFTIME", vec![raw_sql(&shifted), lit_str(pattern)])
        }
    }
}

/// Convert a unix timestamp column into a timestamp expression.
fn from_unix(dialect: Dialect, column: &str, accuracy: Accuracy) -> String {
    let seconds = match accuracy {
        Accuracy::Second => column.to_string(),
        Accuracy::Millisecond => format!("{} / 1000", column),
    };
    match dialect {
        Dialect::Postgres | Dialect::DuckDb => format!("TO_TIMESTAMP({})", seconds),
        Dialect::MySql => format!("FROM_UNIXTIME({})", seconds),
        Dialect::Sqlite => format!("DATETIME({}, 'unixepoch')", seconds),
    }
}

/// Translate `YYYY-MM-DD hh:mm:ss` tokens into the dialect's format syntax.
pub fn convert_format(dialect: Dialect, format: &str) -> String {
    const TOKENS: [&str; 7] = ["YYYY", "MM", "DD", "HH", "hh", "mm", "ss"];

    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for token in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(translate_token(dialect, token));
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' && dialect != Dialect::Postgres {
                out.push('%');
            }
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn translate_token(dialect: Dialect, token: &str) -> &'static str {
    match (dialect, token) {
        (Dialect::Postgres, "YYYY") => "YYYY",
        (Dialect::Postgres, "MM") => "MM",
        (Dialect::Postgres, "DD") => "DD",
        (Dialect::Postgres, "HH" | "hh") => "HH24",
        (Dialect::Postgres, "mm") => "MI",
        (Dialect::Postgres, _) => "SS",
        (Dialect::MySql, "mm") => "%i",
        (_, "YYYY") => "%Y",
        (_, "MM") => "%m",
        (_, "DD") => "%d",
        (_, "HH" | "hh") => "%H",
        (_, "mm") => "%M",
        _ => "%S",
    }
}

fn offset_minutes(timezone: &str) -> i32 {
    utc_offset(timezone)
        .map(|offset| offset.local_minus_utc() / 60)
        .unwrap_or(0)
}

/// `+08:00` style text for a minute offset.
fn offset_text(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}
