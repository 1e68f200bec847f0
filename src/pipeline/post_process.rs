//! Post-processing: coerce numeric columns for transport.
//!
//! Drivers return decimals and big integers as strings. Every truthy value
//! whose field is numeric is converted to a JSON number. Falsy values
//! (`null`, `false`, `0`, `""`) pass through untouched.

use async_trait::async_trait;
use serde_json::Value;

use super::{Middleware, Next, QueryContext};
use crate::error::QueryResult;
use crate::params::{FieldMap, Row};

pub struct PostProcess;

#[async_trait]
impl Middleware for PostProcess {
    fn name(&self) -> &'static str {
        "postProcess"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let data = ctx.take_data()?;
        let rows = post_process_rows(data.rows, &data.field_map);
        ctx.body = Some(Value::Array(rows.into_iter().map(Value::Object).collect()));
        next.run(ctx).await
    }
}

/// Apply each field's coercion to the values of `rows`.
pub fn post_process_rows(mut rows: Vec<Row>, field_map: &FieldMap) -> Vec<Row> {
    for row in &mut rows {
        for (key, value) in row.iter_mut() {
            if !is_truthy(value) {
                continue;
            }
            let coercion = field_map
                .get(key)
                .and_then(|field| field.field_type.as_ref())
                .and_then(|field_type| field_type.coercion());
            if let Some(coerce) = coercion {
                *value = coerce(value);
            }
        }
    }
    rows
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
