//! The chart query pipeline.
//!
//! A request runs through an ordered chain of middleware stages. Each stage
//! may do work, call the rest of the chain through [`Next::run`], and do
//! more work after it returns; a stage that returns without calling `next`
//! short-circuits everything after it.
//!
//! ```text
//! checkPermission ─► cacheMiddleware ─► parseVariables ─► parseFieldAndAssociations
//!        │                 │ hit: body from cache, stop
//!        │ 403             ▼
//!        ▼           parseBuilder ─► queryData ─► postProcess ─► body
//!     Forbidden            ▲                                      │
//!                          └──────── cache write on success ◄─────┘
//! ```
//!
//! [`QueryPipeline::query`] maps any stage error once into a [`QueryFailure`].

mod builder;
mod cache;
mod context;
mod execute;
mod permission;
mod post_process;
mod resolve;
mod variables;

pub use builder::{Aggregation, ParseBuilder};
pub use cache::CacheGate;
pub use context::{
    BuiltQuery, QueryContext, QueryData, ResolvedDimension, ResolvedMeasure, ResolvedOrder,
    ResolvedQuery,
};
pub use execute::ExecuteQuery;
pub use permission::CheckPermission;
pub use post_process::{post_process_rows, PostProcess};
pub use resolve::ParseFieldAndAssociations;
pub use variables::ParseVariables;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::datasource::DataSourceRegistry;
use crate::error::{QueryError, QueryResult};
use crate::params::DEFAULT_LIMIT;
use crate::request::{QueryRequest, RequestState};
use crate::variables::VariableResolver;

/// One stage of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name, used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()>;
}

/// The stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the remaining stages; a no-op at the end of the chain.
    pub fn run<'c>(self, ctx: &'c mut QueryContext) -> BoxFuture<'c, QueryResult<()>>
    where
        'a: 'c,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next { stages: rest };
                Box::pin(async move {
                    tracing::debug!(stage = stage.name(), "entering stage");
                    stage.handle(ctx, next).await
                })
            }
            None => Box::pin(async { Ok(()) }),
        }
    }
}

/// Query limits and cache defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Row limit when a request has none (or a non-positive one).
    pub default_limit: u64,
    /// Upper bound on any requested limit.
    pub max_limit: Option<u64>,
    /// Cache TTL in seconds when a cached request has no `ttl`.
    pub default_ttl_seconds: u64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: None,
            default_ttl_seconds: 60,
        }
    }
}

/// The collaborators the standard stages are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<DataSourceRegistry>,
    pub cache: Arc<dyn CacheStore>,
    pub variables: Arc<dyn VariableResolver>,
    pub options: QueryOptions,
}

/// Error reported to the caller: an HTTP-style status and a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct QueryFailure {
    pub status: u16,
    pub message: String,
}

impl From<QueryError> for QueryFailure {
    fn from(err: QueryError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

/// An ordered chain of stages.
#[derive(Clone, Default)]
pub struct QueryPipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl QueryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// The full chain: permission, cache, variables, resolution, builder,
    /// execution and post-processing.
    pub fn standard(deps: &Collaborators) -> Self {
        Self::new()
            .with(CheckPermission::new(deps.registry.clone()))
            .with(CacheGate::new(deps.cache.clone(), deps.options.default_ttl_seconds))
            .with(ParseVariables::new(deps.variables.clone()))
            .with(ParseFieldAndAssociations::new(deps.registry.clone()))
            .with(ParseBuilder::new(deps.registry.clone(), deps.options))
            .with(ExecuteQuery::new(deps.registry.clone()))
            .with(PostProcess)
    }

    /// The stages up to the query builder, for inspecting a request without running it.
    pub fn planning(deps: &Collaborators) -> Self {
        Self::new()
            .with(CheckPermission::new(deps.registry.clone()))
            .with(ParseVariables::new(deps.variables.clone()))
            .with(ParseFieldAndAssociations::new(deps.registry.clone()))
            .with(ParseBuilder::new(deps.registry.clone(), deps.options))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage against `ctx`.
    pub async fn run(&self, ctx: &mut QueryContext) -> QueryResult<()> {
        Next {
            stages: &self.stages,
        }
        .run(ctx)
        .await
    }

    /// Run a request and return its response body.
    pub async fn query(
        &self,
        request: QueryRequest,
        state: RequestState,
    ) -> Result<Value, QueryFailure> {
        let span = tracing::info_span!(
            "chart_query",
            collection = %request.collection,
            data_source = request.data_source.as_deref().unwrap_or_default(),
            uid = request.uid.as_deref().unwrap_or_default(),
        );

        async move {
            let mut ctx = QueryContext::new(request, state);
            match self.run(&mut ctx).await {
                Ok(()) => Ok(ctx.body.take().unwrap_or(Value::Null)),
                Err(err) => {
                    tracing::warn!(error = %err, status = err.status(), "chart query failed");
                    Err(QueryFailure::from(err))
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
