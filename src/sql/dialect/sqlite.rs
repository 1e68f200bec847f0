//! SQLite SQL dialect.
//!
//! SQLite differences from ANSI:
//! - Booleans are integers (1/0)
//! - OFFSET needs a LIMIT (`LIMIT -1` is unbounded)
//! - `strftime(fmt, ts, modifier)` for date formatting
//! - Array-valued columns are JSON text, expanded with `json_each`

use super::helpers;
use super::SqlDialect;
use crate::sql::token::TokenStream;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_sqlite(limit, offset)
    }

    fn array_contains(&self, array: &str, element: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.value = {})",
            array, element
        )
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_sqlite(name)
    }
}
