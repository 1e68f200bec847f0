//! Cache gate: serve a chart from the cache, or store a fresh result.
//!
//! The cache is used only when the request enables it and carries a `uid`.
//! `refresh` skips the read but still writes the fresh body. The write
//! happens only after the rest of the chain succeeds.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, QueryContext};
use crate::cache::CacheStore;
use crate::error::QueryResult;

pub struct CacheGate {
    store: Arc<dyn CacheStore>,
    default_ttl_seconds: u64,
}

impl CacheGate {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl_seconds: u64) -> Self {
        Self {
            store,
            default_ttl_seconds,
        }
    }
}

#[async_trait]
impl Middleware for CacheGate {
    fn name(&self) -> &'static str {
        "cacheMiddleware"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let Some(key) = ctx.request().cache_key().map(str::to_string) else {
            return next.run(ctx).await;
        };

        if !ctx.request().refresh {
            match self.store.get(&key).await? {
                Some(body) if !body.is_null() => {
                    tracing::info!(uid = %key, "chart served from cache");
                    ctx.body = Some(body);
                    return Ok(());
                }
                _ => tracing::debug!(uid = %key, "cache miss"),
            }
        }

        next.run(ctx).await?;

        let ttl_seconds = ctx
            .request()
            .cache
            .and_then(|cache| cache.ttl)
            .unwrap_or(self.default_ttl_seconds);
        let body = ctx.body.clone().unwrap_or_default();
        self.store
            .set(&key, &body, ttl_seconds.saturating_mul(1000))
            .await?;
        Ok(())
    }
}
