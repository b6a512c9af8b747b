//! Reading sources: the backends raw readings are fetched from.
//!
//! Every backend implements [`ReadingSource`]. Which one is active is decided
//! by configuration through [`ConfiguredSource`]; callers only ever see the
//! trait.

use std::{collections::BTreeSet, sync::Arc};

use energy_client::domain::{EntityId, Reading, ReadingBatch};
use time::OffsetDateTime;

use crate::config::SourceConfig;

pub mod cached;
pub mod csv_snapshot;
pub mod mock_rest;
pub mod random_sample;
pub mod smard;

pub use cached::CachedSource;
pub use csv_snapshot::CsvSnapshotSource;
pub use mock_rest::MockRestSource;
pub use random_sample::RandomSampleSource;
pub use smard::SmardSource;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed data: {0}")]
    MalformedData(String),
    #[error("source misconfigured: {0}")]
    Configuration(String),
}

#[async_trait::async_trait]
pub trait ReadingSource: Send + Sync {
    /// Readings of the requested entities with `timestamp >= since`.
    ///
    /// Entities without readings may be absent from the returned batch.
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError>;

    /// Forgets memoized results. Uncached sources have nothing to forget.
    fn invalidate(&self) {}
}

#[async_trait::async_trait]
impl<S: ReadingSource + ?Sized> ReadingSource for Arc<S> {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        (**self).fetch(entity_ids, since).await
    }

    fn invalidate(&self) {
        (**self).invalidate()
    }
}

/// Groups readings by entity, keeping requested entities and readings at or after `since`.
pub(crate) fn group_readings(
    readings: impl IntoIterator<Item = Reading>,
    entity_ids: &BTreeSet<EntityId>,
    since: OffsetDateTime,
) -> ReadingBatch {
    let mut batch = ReadingBatch::new();
    for reading in readings {
        if reading.timestamp >= since && entity_ids.contains(&reading.entity_id) {
            batch.entry(reading.entity_id.clone()).or_default().push(reading);
        }
    }
    batch
}

/// The backend selected by `[source]` in the configuration.
pub enum ConfiguredSource {
    Smard(SmardSource),
    Csv(CsvSnapshotSource),
    MockRest(MockRestSource),
    Random(RandomSampleSource),
}

impl ConfiguredSource {
    pub fn from_config(cfg: &SourceConfig) -> Result<Self, SourceError> {
        Ok(match cfg {
            SourceConfig::Smard(c) => Self::Smard(SmardSource::from_config(c)?),
            SourceConfig::Csv(c) => Self::Csv(CsvSnapshotSource::from_config(c)?),
            SourceConfig::MockRest(c) => Self::MockRest(MockRestSource::from_config(c)?),
            SourceConfig::Random(c) => Self::Random(RandomSampleSource::from_config(c)),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Smard(_) => "smard",
            Self::Csv(_) => "csv",
            Self::MockRest(_) => "mock_rest",
            Self::Random(_) => "random",
        }
    }
}

#[async_trait::async_trait]
impl ReadingSource for ConfiguredSource {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        let res = match self {
            Self::Smard(s) => s.fetch(entity_ids, since).await,
            Self::Csv(s) => s.fetch(entity_ids, since).await,
            Self::MockRest(s) => s.fetch(entity_ids, since).await,
            Self::Random(s) => s.fetch(entity_ids, since).await,
        };

        if let Err(e) = &res {
            metrics::counter!("source_fetch_errors_total", "source" => self.kind()).increment(1);
            tracing::warn!(source = self.kind(), error = %e, "reading source fetch failed");
        }
        res
    }
}
