//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for the dialect differences
//! a chart query runs into:
//!
//! - Identifier quoting: `"` (PG/DuckDB/SQLite), `` ` `` (MySQL)
//! - Boolean literals: true/false vs 1/0
//! - Membership in an array-valued column (belongsToArray joins)
//! - Function names for date formatting
//!
//! # Usage
//!
//! ```ignore
//! use vizquery::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```

mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - PostgreSQL/DuckDB/SQLite: `"identifier"`
    /// - MySQL: `` `identifier` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal with `''` escaping.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    ///
    /// - PostgreSQL/DuckDB: `true`/`false`
    /// - MySQL/SQLite: `1`/`0`
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    // =========================================================================
    // Array membership
    // =========================================================================

    /// Predicate: `element` is one of the values stored in the array column `array`.
    ///
    /// Both arguments are already-rendered SQL fragments. The default is the
    /// PostgreSQL array form `element = ANY(array)`.
    fn array_contains(&self, array: &str, element: &str) -> String {
        format!("{} = ANY({})", element, array)
    }

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to keep the name as is.
    /// The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    MySql,
    DuckDb,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Sqlite => &Sqlite,
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::DuckDb => &DuckDb,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn array_contains(&self, array: &str, element: &str) -> String {
        self.dialect().array_contains(array, element)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "duckdb" => Ok(Dialect::DuckDb),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::Sqlite.to_string(), "sqlite");
        assert_eq!(Dialect::DuckDb.to_string(), "duckdb");
        assert_eq!(Dialect::Postgres.to_string(), "postgres");
        assert_eq!(Dialect::MySql.to_string(), "mysql");
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgresql".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("MariaDB".parse::<Dialect>(), Ok(Dialect::MySql));
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            dialect: Dialect,
        }
        let holder: Holder = toml::from_str("dialect = \"mysql\"").unwrap();
        assert_eq!(holder.dialect, Dialect::MySql);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::DuckDb.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::Postgres.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::Sqlite.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::MySql.quote_identifier("users"), "`users`");
    }

    #[test]
    fn test_quote_identifier_escaping() {
        assert_eq!(
            Dialect::Sqlite.quote_identifier("weird\"name"),
            "\"weird\"\"name\""
        );
        assert_eq!(
            Dialect::MySql.quote_identifier("weird`name"),
            "`weird``name`"
        );
    }

    #[test]
    fn test_format_bool() {
        assert_eq!(Dialect::DuckDb.format_bool(true), "true");
        assert_eq!(Dialect::Postgres.format_bool(false), "false");
        assert_eq!(Dialect::Sqlite.format_bool(true), "1");
        assert_eq!(Dialect::MySql.format_bool(false), "0");
    }

    #[test]
    fn test_array_contains() {
        assert_eq!(
            Dialect::Postgres.array_contains("\"o\".\"tag_ids\"", "\"t\".\"id\""),
            "\"t\".\"id\" = ANY(\"o\".\"tag_ids\")"
        );
        assert_eq!(
            Dialect::MySql.array_contains("`o`.`tag_ids`", "`t`.`id`"),
            "JSON_CONTAINS(`o`.`tag_ids`, JSON_ARRAY(`t`.`id`))"
        );
        assert!(Dialect::Sqlite
            .array_contains("\"o\".\"tag_ids\"", "\"t\".\"id\"")
            .contains("json_each(\"o\".\"tag_ids\")"));
        assert_eq!(
            Dialect::DuckDb.array_contains("\"o\".\"tag_ids\"", "\"t\".\"id\""),
            "list_contains(\"o\".\"tag_ids\", \"t\".\"id\")"
        );
    }

    #[test]
    fn test_remap_function_datetime() {
        assert_eq!(Dialect::DuckDb.remap_function("STRFTIME"), None);
        assert_eq!(
            Dialect::Postgres.remap_function("STRFTIME"),
            Some("TO_CHAR")
        );
        assert_eq!(
            Dialect::MySql.remap_function("STRFTIME"),
            Some("DATE_FORMAT")
        );
        assert_eq!(Dialect::Sqlite.remap_function("TO_CHAR"), Some("STRFTIME"));
        assert_eq!(Dialect::Sqlite.remap_function("strftime"), None);
    }

    #[test]
    fn test_remap_function_null_handling() {
        assert_eq!(Dialect::Postgres.remap_function("NVL"), Some("COALESCE"));
        assert_eq!(Dialect::MySql.remap_function("NVL"), Some("IFNULL"));
        assert_eq!(Dialect::Sqlite.remap_function("nvl"), Some("IFNULL"));
    }

    #[test]
    fn test_remap_function_unknown() {
        assert_eq!(Dialect::DuckDb.remap_function("CUSTOM_FUNC"), None);
        assert_eq!(Dialect::Postgres.remap_function("CUSTOM_FUNC"), None);
        assert_eq!(Dialect::Sqlite.remap_function("CUSTOM_FUNC"), None);
        assert_eq!(Dialect::MySql.remap_function("CUSTOM_FUNC"), None);
    }
}
