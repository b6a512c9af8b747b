use std::{collections::BTreeSet, sync::Arc, time::Duration};

use energy_client::domain::{EntityId, ReadingBatch};
use moka::future::Cache;
use time::OffsetDateTime;

use super::{ReadingSource, SourceError};

type CacheKey = (BTreeSet<EntityId>, OffsetDateTime);

/// Memoizes successful fetches per `(entity_ids, since)` for a fixed TTL.
///
/// The cache is unbounded: the working set is a single key per tick, so
/// entries only ever leave by expiry or invalidation. Failures are not cached.
pub struct CachedSource<S> {
    inner: S,
    cache: Cache<CacheKey, Arc<ReadingBatch>>,
}

impl<S: ReadingSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<S: ReadingSource> ReadingSource for CachedSource<S> {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        let key = (entity_ids.clone(), since);

        if let Some(hit) = self.cache.get(&key).await {
            metrics::counter!("reading_source_cache_hits_total").increment(1);
            tracing::debug!(%since, "reading source cache hit");
            return Ok(ReadingBatch::clone(&hit));
        }

        metrics::counter!("reading_source_cache_misses_total").increment(1);
        let batch = self.inner.fetch(entity_ids, since).await?;
        self.cache.insert(key, Arc::new(batch.clone())).await;
        Ok(batch)
    }

    fn invalidate(&self) {
        tracing::debug!("reading source cache invalidated");
        self.cache.invalidate_all();
        self.inner.invalidate();
    }
}
