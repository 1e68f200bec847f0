//! Run the built query through the collection's model.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, QueryContext, QueryData};
use crate::datasource::DataSourceRegistry;
use crate::error::{QueryError, QueryResult};

pub struct ExecuteQuery {
    registry: Arc<DataSourceRegistry>,
}

impl ExecuteQuery {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Middleware for ExecuteQuery {
    fn name(&self) -> &'static str {
        "queryData"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let source = self.registry.resolve(ctx.request().data_source.as_deref())?;
        let model = source
            .collections()
            .get_model(&ctx.request().collection)
            .ok_or_else(|| QueryError::UnknownCollection(ctx.request().collection.clone()))?;

        let built = ctx.built()?;
        let rows = model.find_all(&built.params).await?;
        tracing::debug!(rows = rows.len(), data_source = source.id(), "query returned");

        ctx.data = Some(QueryData {
            rows,
            field_map: built.field_map.clone(),
        });
        next.run(ctx).await
    }
}
