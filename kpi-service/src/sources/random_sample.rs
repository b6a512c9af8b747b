use std::{collections::BTreeSet, sync::Mutex};

use energy_client::domain::{EntityId, Reading, ReadingBatch};
use rand::{rngs::StdRng, Rng, SeedableRng};
use time::OffsetDateTime;

use super::{group_readings, ReadingSource, SourceError};
use crate::config::{RandomChannel, RandomConfig};

/// Synthesizes one reading per channel and fetch: `base ± jitter`, never below zero.
pub struct RandomSampleSource {
    channels: Vec<RandomChannel>,
    rng: Mutex<StdRng>,
}

impl RandomSampleSource {
    pub fn from_config(cfg: &RandomConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            channels: cfg.channels.clone(),
            rng: Mutex::new(rng),
        }
    }

    fn sample(&self, channel: &RandomChannel) -> f64 {
        let jitter = channel.jitter.abs();
        let noise = if jitter > 0.0 {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        (channel.base + noise).max(0.0)
    }
}

#[async_trait::async_trait]
impl ReadingSource for RandomSampleSource {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        let now = OffsetDateTime::now_utc();
        let readings: Vec<Reading> = self
            .channels
            .iter()
            .filter(|c| entity_ids.contains(&c.entity))
            .map(|c| Reading::new(c.entity.clone(), c.metric, now, self.sample(c)))
            .collect();

        Ok(group_readings(readings, entity_ids, since))
    }
}
