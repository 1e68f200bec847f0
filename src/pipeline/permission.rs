//! Permission gate: the caller's role must be allowed to list the collection.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, QueryContext};
use crate::acl::{ANONYMOUS_ROLE, ROOT_ROLE};
use crate::datasource::DataSourceRegistry;
use crate::error::{QueryError, QueryResult};

pub struct CheckPermission {
    registry: Arc<DataSourceRegistry>,
}

impl CheckPermission {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Middleware for CheckPermission {
    fn name(&self) -> &'static str {
        "checkPermission"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let request = ctx.request();
        let role = ctx.state.role.as_deref().unwrap_or(ANONYMOUS_ROLE);
        let acl = self.registry.acl_for(request.data_source.as_deref());

        if !acl.can(role, &request.collection, "list") && role != ROOT_ROLE {
            tracing::debug!(role, collection = %request.collection, "permission denied");
            return Err(QueryError::Forbidden);
        }
        next.run(ctx).await
    }
}
