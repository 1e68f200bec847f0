//! SQL generation module.
//!
//! A type-safe SQL builder that renders the chart query for whichever
//! dialect a data source speaks:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    and_all, col, func, lit_bool, lit_float, lit_int, lit_null, lit_str, or_all, raw_sql, sum,
    table_col, BinaryOperator, Expr, ExprExt, Literal,
};
pub use query::{Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use token::{Token, TokenStream};
