//! Wiring: settings → data sources, ACL, cache and pipelines.

use std::fs;
use std::sync::Arc;

use serde_json::Value;

use crate::acl::StaticAcl;
use crate::cache::{CacheError, CacheStore, MemoryCache, SqliteCache};
use crate::config::{CacheBackend, DataSourceSettings, Driver, Settings, SettingsError};
use crate::datasource::{CollectionManager, DataSource, DataSourceRegistry};
use crate::error::QueryError;
use crate::executor::{render_query, SqliteDatabase};
use crate::pipeline::{Collaborators, QueryContext, QueryFailure, QueryPipeline};
use crate::request::{QueryRequest, RequestState};
use crate::schema::{SchemaCatalog, SchemaError};
use crate::variables::ContextVariables;

/// Errors raised while building a [`QueryService`] from settings.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Data source '{id}': {source}")]
    Schema { id: String, source: SchemaError },

    #[error("Data source '{id}': {source}")]
    Database { id: String, source: QueryError },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Runs chart queries against the configured data sources.
pub struct QueryService {
    registry: Arc<DataSourceRegistry>,
    pipeline: QueryPipeline,
    planner: QueryPipeline,
}

impl QueryService {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            pipeline: QueryPipeline::standard(&deps),
            planner: QueryPipeline::planning(&deps),
            registry: deps.registry,
        }
    }

    /// Build every data source, the ACL and the cache described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, BootstrapError> {
        let acl = Arc::new(StaticAcl::from_roles(&settings.acl.roles));
        let mut registry = DataSourceRegistry::new(acl);
        if let Some(id) = settings.default_data_source() {
            registry = registry.with_default(id);
        }

        let mut ids: Vec<&String> = settings.data_sources.keys().collect();
        ids.sort();
        for id in ids {
            let source = open_data_source(id, &settings.data_sources[id])?;
            registry = registry.register(source);
        }

        let cache: Arc<dyn CacheStore> = match settings.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
            CacheBackend::Sqlite => match settings.cache.resolved_path()? {
                Some(path) => Arc::new(SqliteCache::open_at(&path)?),
                None => Arc::new(SqliteCache::open()?),
            },
        };

        tracing::info!(
            data_sources = settings.data_sources.len(),
            cache = ?settings.cache.backend,
            "query service ready"
        );

        Ok(Self::new(Collaborators {
            registry: Arc::new(registry),
            cache,
            variables: Arc::new(ContextVariables::new()),
            options: settings.query_options(),
        }))
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    /// Run a chart query and return the response body.
    pub async fn query(
        &self,
        request: QueryRequest,
        state: RequestState,
    ) -> Result<Value, QueryFailure> {
        self.pipeline.query(request, state).await
    }

    /// The SQL a request would run, without running it or touching the cache.
    pub async fn explain(
        &self,
        request: QueryRequest,
        state: RequestState,
    ) -> Result<String, QueryFailure> {
        let dialect = self
            .registry
            .resolve(request.data_source.as_deref())?
            .dialect();

        let mut ctx = QueryContext::new(request, state);
        self.planner.run(&mut ctx).await?;

        let resolved = ctx.resolved()?;
        let built = ctx.built()?;
        Ok(render_query(&resolved.collection, &built.params, dialect).to_sql(dialect))
    }
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("default_data_source", &self.registry.default_id())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

fn open_data_source(id: &str, settings: &DataSourceSettings) -> Result<DataSource, BootstrapError> {
    let dialect = settings.dialect()?;
    let catalog = load_catalog(id, settings)?;

    let collections: Arc<dyn CollectionManager> = match settings.driver {
        Some(Driver::Sqlite) => {
            let db = match settings.resolved_path()? {
                Some(path) => SqliteDatabase::open(&path, catalog),
                None => SqliteDatabase::open_in_memory(catalog),
            }
            .map_err(|source| BootstrapError::Database {
                id: id.to_string(),
                source,
            })?;

            if let Some(path) = settings.resolved_init_sql_path()? {
                let sql = fs::read_to_string(&path).map_err(|source| BootstrapError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                db.execute_batch(&sql)
                    .map_err(|source| BootstrapError::Database {
                        id: id.to_string(),
                        source,
                    })?;
            }
            Arc::new(db)
        }
        None => Arc::new(catalog),
    };

    tracing::debug!(data_source = id, %dialect, driver = settings.driver.map(|d| d.as_str()), "data source opened");

    let mut source = DataSource::new(id, dialect, collections);
    if !settings.roles.is_empty() {
        source = source.with_acl(Arc::new(StaticAcl::from_roles(&settings.roles)));
    }
    Ok(source)
}

/// Collections from the schema file followed by those declared inline.
fn load_catalog(id: &str, settings: &DataSourceSettings) -> Result<SchemaCatalog, BootstrapError> {
    let schema_err = |source| BootstrapError::Schema {
        id: id.to_string(),
        source,
    };

    let mut collections = vec![];
    if let Some(path) = settings.resolved_schema_path()? {
        let content = fs::read_to_string(&path).map_err(|source| BootstrapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        collections.extend(
            SchemaCatalog::collections_from_toml_str(&content).map_err(schema_err)?,
        );
    }
    collections.extend(settings.collections.iter().cloned());

    SchemaCatalog::from_collections(collections).map_err(schema_err)
}
