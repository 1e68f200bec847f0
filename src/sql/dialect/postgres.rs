//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features used by chart queries:
//! - ANSI identifier quoting (`"`)
//! - Native boolean type (true/false)
//! - `to_char` for date formatting
//! - Native arrays (`x = ANY(arr)`) for belongsToArray joins

use super::helpers;
use super::SqlDialect;

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    // Uses default emit_limit_offset and array_contains

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_postgres(name)
    }
}
