//! Query parameters handed to a collection model's `find_all`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::schema::{FieldType, IncludeOptions};
use crate::sql::{Expr, OrderByExpr, SelectExpr};

/// Default row cap when a request carries no (or a zero) limit.
pub const DEFAULT_LIMIT: u64 = 2000;

/// One result row, keyed by attribute alias.
pub type Row = Map<String, Value>;

/// A logical field resolved against the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Logical name; `association.name` for fields of an association.
    pub name: String,
    /// Table alias the column lives on: the collection or the association name.
    pub table: String,
    /// Storage column.
    pub column: String,
    /// Declared type, from the schema when the field is known.
    pub field_type: Option<FieldType>,
    pub options: Map<String, Value>,
    /// Output alias, never empty.
    pub alias: String,
}

/// Alias → resolved field, used to coerce result values.
pub type FieldMap = HashMap<String, ResolvedField>;

/// Everything a model needs to run one aggregated or raw query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    pub attributes: Vec<SelectExpr>,
    pub include: Vec<IncludeOptions>,
    pub where_clause: Option<Expr>,
    pub group: Vec<Expr>,
    pub order: Vec<OrderByExpr>,
    pub limit: u64,
    /// Never split includes into a subquery; the row limit applies to the joined rows.
    pub sub_query: bool,
    /// Return flat rows keyed by alias instead of nested model instances.
    pub raw: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            attributes: vec![],
            include: vec![],
            where_clause: None,
            group: vec![],
            order: vec![],
            limit: DEFAULT_LIMIT,
            sub_query: false,
            raw: true,
        }
    }
}
