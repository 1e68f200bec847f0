//! Query builder: resolved fields → [`QueryParams`].
//!
//! The query is aggregated as soon as one measure carries an aggregation.
//! Measures are processed first, so every dimension then also becomes a
//! GROUP BY key, and orders refer to output aliases instead of columns.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{BuiltQuery, Middleware, Next, QueryContext, QueryOptions};
use crate::datasource::DataSourceRegistry;
use crate::error::{QueryError, QueryResult};
use crate::formatter::{self, FormatSpec};
use crate::params::{FieldMap, QueryParams, ResolvedField};
use crate::sql::{col, table_col, Dialect, Expr, OrderByExpr, SelectExpr};

/// The aggregation functions a measure may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    /// Parse an allowed aggregation name; anything else is rejected.
    pub fn parse(name: &str) -> QueryResult<Self> {
        match name {
            "sum" => Ok(Aggregation::Sum),
            "count" => Ok(Aggregation::Count),
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(QueryError::InvalidAggregation(other.to_string())),
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Count => "COUNT",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    /// `FN(expr)`, or `FN(DISTINCT expr)`.
    pub fn apply(&self, expr: Expr, distinct: bool) -> Expr {
        Expr::Function {
            name: self.function_name().to_string(),
            args: vec![expr],
            distinct,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.function_name().to_lowercase())
    }
}

pub struct ParseBuilder {
    registry: Arc<DataSourceRegistry>,
    options: QueryOptions,
}

impl ParseBuilder {
    pub fn new(registry: Arc<DataSourceRegistry>, options: QueryOptions) -> Self {
        Self { registry, options }
    }

    fn limit(&self, requested: Option<i64>) -> u64 {
        let limit = requested
            .filter(|n| *n > 0)
            .map(|n| n as u64)
            .unwrap_or(self.options.default_limit);
        match self.options.max_limit {
            Some(max) => limit.min(max),
            None => limit,
        }
    }
}

fn column(field: &ResolvedField) -> Expr {
    table_col(&field.table, &field.column)
}

#[async_trait]
impl Middleware for ParseBuilder {
    fn name(&self) -> &'static str {
        "parseBuilder"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let dialect = self
            .registry
            .resolve(ctx.request().data_source.as_deref())?
            .dialect();
        let built = build(
            ctx.resolved()?,
            dialect,
            &ctx.state.timezone,
            self.limit(ctx.request().limit),
        )?;

        tracing::debug!(
            attributes = built.params.attributes.len(),
            grouped = !built.params.group.is_empty(),
            limit = built.params.limit,
            "query built"
        );
        ctx.built = Some(built);
        next.run(ctx).await
    }
}

fn build(
    resolved: &super::ResolvedQuery,
    dialect: Dialect,
    timezone: &str,
    limit: u64,
) -> QueryResult<BuiltQuery> {
    let mut attributes = vec![];
    let mut group = vec![];
    let mut order = vec![];
    let mut field_map = FieldMap::new();
    let mut has_agg = false;

    for measure in &resolved.measures {
        let field = &measure.field;
        let expr = match &measure.aggregation {
            Some(name) => {
                let aggregation = Aggregation::parse(name)?;
                has_agg = true;
                aggregation.apply(column(field), measure.distinct)
            }
            None => column(field),
        };
        attributes.push(SelectExpr::new(expr).with_alias(&field.alias));
        field_map.insert(field.alias.clone(), field.clone());
    }

    for dimension in &resolved.dimensions {
        let field = &dimension.field;
        let expr = match &dimension.format {
            Some(format) => formatter::format(
                dialect,
                &FormatSpec {
                    field_type: field.field_type.as_ref(),
                    table: &field.table,
                    column: &field.column,
                    format,
                    timezone,
                    options: &field.options,
                },
            ),
            None => column(field),
        };
        if has_agg {
            group.push(expr.clone());
        }
        attributes.push(SelectExpr::new(expr).with_alias(&field.alias));
        field_map.insert(field.alias.clone(), field.clone());
    }

    for item in &resolved.orders {
        let expr = if has_agg {
            col(&item.field.alias)
        } else {
            column(&item.field)
        };
        order.push(OrderByExpr::with_dir(expr, item.direction));
    }

    Ok(BuiltQuery {
        params: QueryParams {
            attributes,
            include: resolved.include.clone(),
            where_clause: resolved.where_clause.clone(),
            group,
            order,
            limit,
            sub_query: false,
            raw: true,
        },
        field_map,
    })
}
