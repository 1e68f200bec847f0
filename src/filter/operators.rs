//! Comparison operators of the filter language.

use serde_json::Value;

use super::FilterError;
use crate::sql::{lit_bool, lit_float, lit_int, lit_null, lit_str, or_all, Expr, ExprExt};

const LIKE_ESCAPE: char = '\\';

/// Translate `column <op> value` into a predicate.
pub fn apply(column: Expr, op: &str, value: &Value) -> Result<Expr, FilterError> {
    let expr = match op {
        "$eq" => match value {
            Value::Null => column.is_null(),
            Value::Array(items) => column.in_list(literals(op, items)?),
            _ => column.eq(literal(op, value)?),
        },
        "$ne" => match value {
            Value::Null => column.is_not_null(),
            Value::Array(items) => {
                let values = literals(op, items)?;
                column.clone().not_in_list(values).or(column.is_null())
            }
            _ => column
                .clone()
                .ne(literal(op, value)?)
                .or(column.is_null()),
        },
        "$gt" => column.gt(literal(op, value)?),
        "$gte" => column.gte(literal(op, value)?),
        "$lt" => column.lt(literal(op, value)?),
        "$lte" => column.lte(literal(op, value)?),
        "$in" => column.in_list(list(op, value)?),
        "$notIn" => column.not_in_list(list(op, value)?),
        "$includes" => like_any(column, op, value, |s| format!("%{}%", s), false)?,
        "$notIncludes" => {
            let pattern = like_any(column.clone(), op, value, |s| format!("%{}%", s), true)?;
            pattern.or(column.is_null())
        }
        "$startsWith" => like_any(column, op, value, |s| format!("{}%", s), false)?,
        "$endsWith" => like_any(column, op, value, |s| format!("%{}", s), false)?,
        "$empty" => column.clone().is_null().or(column.eq(lit_str(""))),
        "$notEmpty" => column
            .clone()
            .is_not_null()
            .and(column.ne(lit_str(""))),
        "$exists" => column.is_not_null(),
        "$notExists" => column.is_null(),
        "$between" => match value {
            Value::Array(bounds) if bounds.len() == 2 => {
                column.between(literal(op, &bounds[0])?, literal(op, &bounds[1])?)
            }
            _ => {
                return Err(FilterError::InvalidValue {
                    operator: op.to_string(),
                    expected: "a two-element array",
                })
            }
        },
        "$isTruly" => column.eq(lit_bool(true)),
        "$isFalsy" => column.clone().eq(lit_bool(false)).or(column.is_null()),
        other => return Err(FilterError::UnknownOperator(other.to_string())),
    };
    Ok(expr)
}

/// Convert a scalar JSON value to a SQL literal.
pub fn literal(op: &str, value: &Value) -> Result<Expr, FilterError> {
    match value {
        Value::Null => Ok(lit_null()),
        Value::Bool(b) => Ok(lit_bool(*b)),
        Value::Number(n) => Ok(match n.as_i64() {
            Some(i) => lit_int(i),
            None => lit_float(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Ok(lit_str(s)),
        Value::Array(_) | Value::Object(_) => Err(FilterError::InvalidValue {
            operator: op.to_string(),
            expected: "a scalar",
        }),
    }
}

fn literals(op: &str, items: &[Value]) -> Result<Vec<Expr>, FilterError> {
    items.iter().map(|item| literal(op, item)).collect()
}

fn list(op: &str, value: &Value) -> Result<Vec<Expr>, FilterError> {
    match value {
        Value::Array(items) => literals(op, items),
        scalar => Ok(vec![literal(op, scalar)?]),
    }
}

/// LIKE against one pattern, or any of several when `value` is an array.
fn like_any(
    column: Expr,
    op: &str,
    value: &Value,
    pattern: impl Fn(&str) -> String,
    negated: bool,
) -> Result<Expr, FilterError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    };

    let mut predicates = Vec::with_capacity(items.len());
    for item in items {
        let text = match item {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => {
                return Err(FilterError::InvalidValue {
                    operator: op.to_string(),
                    expected: "a string or an array of strings",
                })
            }
        };
        let pattern = lit_str(&pattern(&escape_like(&text)));
        predicates.push(if negated {
            column.clone().not_like_escape(pattern, LIKE_ESCAPE)
        } else {
            column.clone().like_escape(pattern, LIKE_ESCAPE)
        });
    }

    let combined = if negated {
        crate::sql::and_all(predicates)
    } else {
        or_all(predicates)
    };
    combined.ok_or_else(|| FilterError::InvalidValue {
        operator: op.to_string(),
        expected: "a non-empty value",
    })
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}
