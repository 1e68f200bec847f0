//! Collection metadata: fields, declared types and relations.
//!
//! A [`SchemaCatalog`] is the in-memory registry of collections for one data
//! source. It is loaded from a TOML file of the form:
//!
//! ```toml
//! [[collections]]
//! name = "orders"
//!
//! [[collections.fields]]
//! name = "amount"
//! type = "decimal"
//!
//! [[collections.fields]]
//! name = "customer"
//! type = "belongsTo"
//! target = "customers"
//! foreign_key = "customer_id"
//! ```

mod field_type;
mod relation;

pub use field_type::{to_number, Coercion, FieldType};
pub use relation::{GeneratedInclude, IncludeOptions, RelationKind, ThroughOptions};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised while loading a schema catalog.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse schema: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate collection: {0}")]
    DuplicateCollection(String),

    #[error("Field '{collection}.{field}' targets unknown collection '{target}'")]
    UnknownTarget {
        collection: String,
        field: String,
        target: String,
    },
}

// =============================================================================
// Fields
// =============================================================================

/// A field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Storage column, when it differs from the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    /// Free-form field options (e.g. `accuracy` for unix timestamps).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            column: None,
            target: None,
            foreign_key: None,
            source_key: None,
            target_key: None,
            other_key: None,
            through: None,
            options: Map::new(),
        }
    }

    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::BelongsTo).with_target(target)
    }

    pub fn has_one(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::HasOne).with_target(target)
    }

    pub fn has_many(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::HasMany).with_target(target)
    }

    pub fn belongs_to_many(name: &str, target: &str, through: &str) -> Self {
        let mut field = Self::new(name, FieldType::BelongsToMany).with_target(target);
        field.through = Some(through.to_string());
        field
    }

    pub fn belongs_to_array(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::BelongsToArray).with_target(target)
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    pub fn with_source_key(mut self, key: &str) -> Self {
        self.source_key = Some(key.to_string());
        self
    }

    pub fn with_target_key(mut self, key: &str) -> Self {
        self.target_key = Some(key.to_string());
        self
    }

    pub fn with_other_key(mut self, key: &str) -> Self {
        self.other_key = Some(key.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// Storage column backing this field.
    pub fn storage_column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

// =============================================================================
// Collections
// =============================================================================

/// A collection (table) and its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    /// Physical table, when it differs from the collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table_name: None,
            fields: vec![],
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table_name = Some(table.to_string());
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.name)
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Storage column for a logical field name. Unknown fields map to their own name.
    pub fn storage_column<'a>(&'a self, name: &'a str) -> &'a str {
        self.get_field(name)
            .map(FieldDef::storage_column)
            .unwrap_or(name)
    }

    /// The relation declared by field `name`, if it is a relation field.
    pub fn relation(&self, name: &str) -> Option<RelationKind> {
        self.get_field(name)
            .and_then(|field| RelationKind::from_field(&self.name, field))
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    collections: Vec<Collection>,
}

/// In-memory registry of collections for one data source.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    collections: HashMap<String, Arc<Collection>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from collections, validating relation targets.
    pub fn from_collections(collections: Vec<Collection>) -> Result<Self, SchemaError> {
        let mut catalog = Self::new();
        for collection in collections {
            if catalog.collections.contains_key(&collection.name) {
                return Err(SchemaError::DuplicateCollection(collection.name));
            }
            catalog
                .collections
                .insert(collection.name.clone(), Arc::new(collection));
        }
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        Self::from_collections(Self::collections_from_toml_str(content)?)
    }

    /// Parse the collections of a schema file without validating them.
    pub fn collections_from_toml_str(content: &str) -> Result<Vec<Collection>, SchemaError> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(file.collections)
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Add or replace a collection without validation.
    pub fn insert(&mut self, collection: Collection) {
        self.collections
            .insert(collection.name.clone(), Arc::new(collection));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for collection in self.collections.values() {
            for field in &collection.fields {
                if let Some(relation) = RelationKind::from_field(&collection.name, field) {
                    if !self.collections.contains_key(relation.target()) {
                        return Err(SchemaError::UnknownTarget {
                            collection: collection.name.clone(),
                            field: field.name.clone(),
                            target: relation.target().to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
[[collections]]
name = "orders"

[[collections.fields]]
name = "amount"
type = "decimal"

[[collections.fields]]
name = "createdAt"
type = "date"
column = "created_at"

[[collections.fields]]
name = "customer"
type = "belongsTo"
target = "customers"
foreign_key = "customer_id"

[[collections]]
name = "customers"
table_name = "crm_customers"

[[collections.fields]]
name = "name"
type = "string"
"#;

    #[test]
    fn test_load_from_toml() {
        let catalog = SchemaCatalog::from_toml_str(SCHEMA).unwrap();
        assert_eq!(catalog.names(), vec!["customers", "orders"]);

        let orders = catalog.get("orders").unwrap();
        assert_eq!(orders.table_name(), "orders");
        assert_eq!(orders.storage_column("createdAt"), "created_at");
        assert_eq!(orders.storage_column("unknown"), "unknown");
        assert_eq!(
            orders.get_field("amount").map(|f| &f.field_type),
            Some(&FieldType::Decimal)
        );

        let customers = catalog.get("customers").unwrap();
        assert_eq!(customers.table_name(), "crm_customers");
    }

    #[test]
    fn test_relation_lookup() {
        let catalog = SchemaCatalog::from_toml_str(SCHEMA).unwrap();
        let orders = catalog.get("orders").unwrap();
        assert_eq!(
            orders.relation("customer"),
            Some(RelationKind::BelongsTo {
                target: "customers".into(),
                foreign_key: "customer_id".into(),
                target_key: "id".into(),
            })
        );
        assert_eq!(orders.relation("amount"), None);
        assert_eq!(orders.relation("missing"), None);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result = SchemaCatalog::from_collections(vec![Collection::new("orders")
            .with_field(FieldDef::belongs_to("customer", "customers"))]);
        assert!(matches!(
            result,
            Err(SchemaError::UnknownTarget { target, .. }) if target == "customers"
        ));
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let result =
            SchemaCatalog::from_collections(vec![Collection::new("a"), Collection::new("a")]);
        assert!(matches!(result, Err(SchemaError::DuplicateCollection(_))));
    }
}
