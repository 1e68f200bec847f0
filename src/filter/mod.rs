//! Filter translation: JSON filter tree → WHERE predicate.
//!
//! The filter language is the platform's JSON filter:
//!
//! ```text
//! { "$and": [ f1, f2 ] }                     conjunction
//! { "$or":  [ f1, f2 ] }                     disjunction
//! { "status": { "$in": ["paid", "sent"] } }  operator on a field
//! { "status": "paid" }                       shorthand for $eq
//! { "customer.name": { "$includes": "a" } }  field of an association
//! { "customer": { "name": { "$eq": "a" } } } same, nested form
//! ```
//!
//! Several keys in one object are ANDed. Fields of an association make the
//! association a required include of the query; the parser reports them in
//! first-seen order.

mod operators;

use serde_json::{Map, Value};

use crate::datasource::CollectionManager;
use crate::schema::Collection;
use crate::sql::{and_all, or_all, table_col, Expr};

/// Errors raised while translating a filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("Operator {operator} expects {expected}")]
    InvalidValue {
        operator: String,
        expected: &'static str,
    },

    #[error("Association '{association}' not found on collection '{collection}'")]
    UnknownAssociation {
        collection: String,
        association: String,
    },

    #[error("Collection not found: {0}")]
    UnknownCollection(String),

    #[error("Unsupported filter path: {0}")]
    UnsupportedPath(String),

    #[error("Invalid filter: {0}")]
    Invalid(String),
}

/// Result of translating a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilter {
    pub where_clause: Option<Expr>,
    /// Associations the predicate references, in first-seen order.
    pub associations: Vec<String>,
}

/// Translates a filter tree against one collection.
pub struct FilterParser<'a> {
    collection: &'a Collection,
    collections: &'a dyn CollectionManager,
    associations: Vec<String>,
}

impl<'a> FilterParser<'a> {
    pub fn new(collection: &'a Collection, collections: &'a dyn CollectionManager) -> Self {
        Self {
            collection,
            collections,
            associations: vec![],
        }
    }

    pub fn parse(mut self, filter: &Value) -> Result<ParsedFilter, FilterError> {
        let where_clause = match filter {
            Value::Null => None,
            Value::Object(map) => self.parse_group(map)?,
            other => {
                return Err(FilterError::Invalid(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };
        Ok(ParsedFilter {
            where_clause,
            associations: self.associations,
        })
    }

    fn parse_group(&mut self, map: &Map<String, Value>) -> Result<Option<Expr>, FilterError> {
        let mut predicates = vec![];
        for (key, value) in map {
            if let Some(predicate) = self.parse_entry(key, value)? {
                predicates.push(predicate);
            }
        }
        Ok(and_all(predicates))
    }

    fn parse_entry(&mut self, key: &str, value: &Value) -> Result<Option<Expr>, FilterError> {
        match key {
            "$and" => {
                let parts = self.parse_list(key, value)?;
                Ok(and_all(parts))
            }
            "$or" => {
                let parts = self.parse_list(key, value)?;
                Ok(or_all(parts))
            }
            op if op.starts_with('$') => Err(FilterError::UnknownOperator(op.to_string())),
            field => {
                let path: Vec<String> = field.split('.').map(str::to_string).collect();
                self.parse_field(path, value)
            }
        }
    }

    fn parse_list(&mut self, key: &str, value: &Value) -> Result<Vec<Expr>, FilterError> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(FilterError::Invalid(format!("{} expects an array", key))),
        };
        let mut parts = vec![];
        for item in items {
            match item {
                Value::Object(map) => {
                    if let Some(expr) = self.parse_group(map)? {
                        parts.push(expr);
                    }
                }
                Value::Null => {}
                other => {
                    return Err(FilterError::Invalid(format!(
                        "{} items must be objects, got {}",
                        key, other
                    )))
                }
            }
        }
        Ok(parts)
    }

    fn parse_field(&mut self, path: Vec<String>, value: &Value) -> Result<Option<Expr>, FilterError> {
        let map = match value {
            Value::Object(map) if !map.is_empty() => map,
            Value::Object(_) => return Ok(None),
            scalar => {
                let column = self.column(&path)?;
                return operators::apply(column, "$eq", scalar).map(Some);
            }
        };

        let mut predicates = vec![];
        for (key, inner) in map {
            if key.starts_with('$') {
                let column = self.column(&path)?;
                predicates.push(operators::apply(column, key, inner)?);
            } else {
                let mut nested = path.clone();
                nested.extend(key.split('.').map(str::to_string));
                if let Some(expr) = self.parse_field(nested, inner)? {
                    predicates.push(expr);
                }
            }
        }
        Ok(and_all(predicates))
    }

    /// Column for a field path, recording the association it crosses.
    fn column(&mut self, path: &[String]) -> Result<Expr, FilterError> {
        match path {
            [field] => Ok(table_col(
                &self.collection.name,
                self.collection.storage_column(field),
            )),
            [association, field] => {
                let relation = self.collection.relation(association).ok_or_else(|| {
                    FilterError::UnknownAssociation {
                        collection: self.collection.name.clone(),
                        association: association.clone(),
                    }
                })?;
                let target = self
                    .collections
                    .get_collection(relation.target())
                    .ok_or_else(|| FilterError::UnknownCollection(relation.target().to_string()))?;
                if !self.associations.contains(association) {
                    self.associations.push(association.clone());
                }
                Ok(table_col(association, target.storage_column(field)))
            }
            _ => Err(FilterError::UnsupportedPath(path.join("."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType, SchemaCatalog};
    use crate::sql::Dialect;
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_collections(vec![
            Collection::new("orders")
                .with_field(FieldDef::new("amount", FieldType::Decimal))
                .with_field(FieldDef::new("createdAt", FieldType::Date).with_column("created_at"))
                .with_field(
                    FieldDef::belongs_to("customer", "customers").with_foreign_key("customer_id"),
                )
                .with_field(FieldDef::belongs_to_many("tags", "tags", "order_tags")),
            Collection::new("customers").with_field(FieldDef::new("name", FieldType::String)),
            Collection::new("tags").with_field(FieldDef::new("title", FieldType::String)),
        ])
        .unwrap()
    }

    fn parse(filter: Value) -> Result<ParsedFilter, FilterError> {
        let catalog = catalog();
        let orders = catalog.get("orders").unwrap();
        FilterParser::new(&orders, &catalog).parse(&filter)
    }

    fn where_sql(filter: Value) -> String {
        parse(filter)
            .unwrap()
            .where_clause
            .map(|e| e.to_sql(Dialect::Sqlite))
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_filters() {
        assert_eq!(parse(Value::Null).unwrap(), ParsedFilter::default());
        assert_eq!(parse(json!({})).unwrap(), ParsedFilter::default());
        assert_eq!(parse(json!({"$and": []})).unwrap(), ParsedFilter::default());
    }

    #[test]
    fn test_field_uses_storage_column() {
        assert_eq!(
            where_sql(json!({"createdAt": {"$gte": "2024-01-01"}})),
            "\"orders\".\"created_at\" >= '2024-01-01'"
        );
    }

    #[test]
    fn test_shorthand_equality() {
        assert_eq!(where_sql(json!({"amount": 10})), "\"orders\".\"amount\" = 10");
    }

    #[test]
    fn test_and_or_grouping() {
        let sql = where_sql(json!({
            "$and": [
                {"amount": {"$gt": 1}},
                {"$or": [{"amount": {"$lt": 100}}, {"amount": {"$eq": null}}]}
            ]
        }));
        assert_eq!(
            sql,
            "\"orders\".\"amount\" > 1 AND (\"orders\".\"amount\" < 100 OR \"orders\".\"amount\" IS NULL)"
        );
    }

    #[test]
    fn test_association_path_is_recorded() {
        let parsed = parse(json!({
            "customer.name": {"$includes": "ann"},
            "tags": {"title": {"$eq": "vip"}},
        }))
        .unwrap();
        assert_eq!(parsed.associations, vec!["customer", "tags"]);
        let sql = parsed.where_clause.unwrap().to_sql(Dialect::Sqlite);
        assert!(sql.contains("\"customer\".\"name\" LIKE '%ann%'"), "{}", sql);
        assert!(sql.contains("\"tags\".\"title\" = 'vip'"), "{}", sql);
    }

    #[test]
    fn test_association_recorded_once() {
        let parsed = parse(json!({
            "$or": [{"customer.name": "a"}, {"customer.name": "b"}]
        }))
        .unwrap();
        assert_eq!(parsed.associations, vec!["customer"]);
    }

    #[test]
    fn test_unknown_association() {
        let err = parse(json!({"vendor.name": "x"})).unwrap_err();
        assert!(matches!(err, FilterError::UnknownAssociation { association, .. } if association == "vendor"));
    }

    #[test]
    fn test_deep_path_unsupported() {
        let err = parse(json!({"customer.company.name": "x"})).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedPath(_)));
    }

    #[test]
    fn test_top_level_operator_rejected() {
        let err = parse(json!({"$not": {}})).unwrap_err();
        assert!(matches!(err, FilterError::UnknownOperator(_)));
    }

    #[test]
    fn test_non_object_filter_rejected() {
        assert!(matches!(parse(json!([1])), Err(FilterError::Invalid(_))));
    }
}
