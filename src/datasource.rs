//! Data sources: collection metadata, models and ACL per database.
//!
//! ```text
//! DataSourceRegistry ──┬── "main"      DataSource { dialect, collections, acl? }
//!                      └── "warehouse" DataSource { ... }
//!                                            │
//!                              CollectionManager ── get_collection(name) -> Collection
//!                                            └───── get_model(name)      -> CollectionModel::find_all
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::acl::Acl;
use crate::error::{QueryError, QueryResult};
use crate::params::{QueryParams, Row};
use crate::schema::{Collection, SchemaCatalog};
use crate::sql::Dialect;

/// Id of the data source used when a request names none.
pub const DEFAULT_DATA_SOURCE: &str = "main";

/// A queryable collection.
#[async_trait]
pub trait CollectionModel: Send + Sync {
    /// Run the query and return flat rows keyed by attribute alias.
    async fn find_all(&self, params: &QueryParams) -> QueryResult<Vec<Row>>;
}

/// Collection metadata and models of one data source.
pub trait CollectionManager: Send + Sync {
    fn get_collection(&self, name: &str) -> Option<Arc<Collection>>;

    fn get_model(&self, name: &str) -> Option<Arc<dyn CollectionModel>>;
}

/// A bare catalog knows collections but has no models to run.
impl CollectionManager for SchemaCatalog {
    fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.get(name)
    }

    fn get_model(&self, _name: &str) -> Option<Arc<dyn CollectionModel>> {
        None
    }
}

/// One database the pipeline can query.
pub struct DataSource {
    id: String,
    dialect: Dialect,
    collections: Arc<dyn CollectionManager>,
    acl: Option<Arc<dyn Acl>>,
}

impl DataSource {
    pub fn new(id: &str, dialect: Dialect, collections: Arc<dyn CollectionManager>) -> Self {
        Self {
            id: id.to_string(),
            dialect,
            collections,
            acl: None,
        }
    }

    /// Give this data source its own ACL instead of the registry-wide one.
    pub fn with_acl(mut self, acl: Arc<dyn Acl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn collections(&self) -> &dyn CollectionManager {
        self.collections.as_ref()
    }

    pub fn acl(&self) -> Option<&Arc<dyn Acl>> {
        self.acl.as_ref()
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("dialect", &self.dialect)
            .field("has_acl", &self.acl.is_some())
            .finish()
    }
}

/// All configured data sources plus the application-wide ACL.
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<DataSource>>,
    default_id: String,
    acl: Arc<dyn Acl>,
}

impl DataSourceRegistry {
    pub fn new(acl: Arc<dyn Acl>) -> Self {
        Self {
            sources: HashMap::new(),
            default_id: DEFAULT_DATA_SOURCE.to_string(),
            acl,
        }
    }

    pub fn register(mut self, source: DataSource) -> Self {
        self.sources
            .insert(source.id.clone(), Arc::new(source));
        self
    }

    pub fn with_default(mut self, id: &str) -> Self {
        self.default_id = id.to_string();
        self
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn get(&self, id: &str) -> Option<Arc<DataSource>> {
        self.sources.get(id).cloned()
    }

    /// The named data source, or the default when none is named or the id is unknown.
    pub fn resolve(&self, id: Option<&str>) -> QueryResult<Arc<DataSource>> {
        if let Some(source) = id.and_then(|id| self.get(id)) {
            return Ok(source);
        }
        if let Some(id) = id {
            tracing::debug!(data_source = id, "unknown data source, using default");
        }
        self.get(&self.default_id)
            .ok_or_else(|| QueryError::UnknownDataSource(id.unwrap_or(&self.default_id).to_string()))
    }

    /// ACL governing the data source [`resolve`](Self::resolve) picks for `id`:
    /// its own, else the application ACL.
    pub fn acl_for(&self, id: Option<&str>) -> Arc<dyn Acl> {
        id.and_then(|id| self.sources.get(id))
            .or_else(|| self.sources.get(&self.default_id))
            .and_then(|source| source.acl.clone())
            .unwrap_or_else(|| self.acl.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::StaticAcl;

    fn registry() -> DataSourceRegistry {
        let catalog: Arc<dyn CollectionManager> = Arc::new(SchemaCatalog::new());
        DataSourceRegistry::new(Arc::new(StaticAcl::new().grant("member", "orders:list")))
            .register(DataSource::new("main", Dialect::Sqlite, catalog.clone()))
            .register(
                DataSource::new("warehouse", Dialect::Postgres, catalog)
                    .with_acl(Arc::new(StaticAcl::new().grant("analyst", "*"))),
            )
    }

    #[test]
    fn test_resolve_named_and_default() {
        let registry = registry();
        assert_eq!(registry.resolve(Some("warehouse")).unwrap().id(), "warehouse");
        assert_eq!(registry.resolve(None).unwrap().id(), "main");
        assert_eq!(registry.resolve(Some("missing")).unwrap().id(), "main");
    }

    #[test]
    fn test_resolve_without_default_fails() {
        let registry = registry().with_default("nope");
        assert!(matches!(
            registry.resolve(None),
            Err(QueryError::UnknownDataSource(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_acl_falls_back_to_application_acl() {
        let registry = registry();
        assert!(registry.acl_for(None).can("member", "orders", "list"));
        assert!(registry.acl_for(Some("main")).can("member", "orders", "list"));
        assert!(registry.acl_for(Some("warehouse")).can("analyst", "orders", "list"));
        assert!(!registry.acl_for(Some("warehouse")).can("member", "orders", "list"));
    }

    #[test]
    fn test_unnamed_source_uses_default_acl() {
        let registry = registry().with_default("warehouse");
        assert!(registry.acl_for(None).can("analyst", "orders", "list"));
        assert!(!registry.acl_for(None).can("member", "orders", "list"));
    }

    #[test]
    fn test_catalog_has_no_models() {
        let catalog = SchemaCatalog::new();
        assert!(catalog.get_model("orders").is_none());
    }
}
