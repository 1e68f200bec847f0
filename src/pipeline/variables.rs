//! Substitute context variables into the working filter.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, QueryContext};
use crate::error::QueryResult;
use crate::variables::VariableResolver;

pub struct ParseVariables {
    resolver: Arc<dyn VariableResolver>,
}

impl ParseVariables {
    pub fn new(resolver: Arc<dyn VariableResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Middleware for ParseVariables {
    fn name(&self) -> &'static str {
        "parseVariables"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        if let Some(filter) = ctx.filter.take() {
            ctx.filter = Some(self.resolver.resolve(&filter, &ctx.state).await?);
        }
        next.run(ctx).await
    }
}
