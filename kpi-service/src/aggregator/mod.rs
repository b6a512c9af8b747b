use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};

use energy_client::domain::{Baselines, Entity, EntityId, Kpi, KpiSnapshot, MetricKind, Reading, ReadingBatch};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::{
    config::FetchWindow,
    sources::{ReadingSource, SourceError},
    transform,
};

/// What the aggregator publishes after every tick.
///
/// The stale bookkeeping lives next to the snapshot rather than in it, so a
/// reused snapshot is identical to the one that was computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardState {
    pub snapshot: KpiSnapshot,
    /// Number of ticks run so far; 0 before the first tick.
    pub tick: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
    /// Consecutive failed ticks the snapshot has been carried over for.
    pub stale_ticks: u64,
    pub last_error: Option<String>,
}

impl DashboardState {
    pub fn is_stale(&self) -> bool {
        self.stale_ticks > 0
    }
}

/// Turns raw readings into a [`KpiSnapshot`] once per tick.
///
/// The newest reading seen per entity and metric is kept across ticks, so a
/// backend whose data did not move since the last fetch keeps its values.
/// A kept reading expires once it falls out of the lookback window.
pub struct KpiAggregator<S> {
    source: S,
    entities: Vec<Entity>,
    entity_ids: BTreeSet<EntityId>,
    baselines: Baselines,
    lookback: time::Duration,
    granularity: time::Duration,
    window: FetchWindow,
    known: BTreeMap<(EntityId, MetricKind), Reading>,
    last_success: Option<OffsetDateTime>,
    tick: u64,
    stale_ticks: u64,
    publisher: watch::Sender<Arc<DashboardState>>,
}

impl<S: ReadingSource> KpiAggregator<S> {
    pub fn new(source: S, entities: Vec<Entity>, baselines: Baselines) -> Self {
        let entity_ids = entities.iter().map(|e| e.id.clone()).collect();
        let initial = DashboardState {
            snapshot: KpiSnapshot::defaults_for(&entities, &baselines),
            tick: 0,
            computed_at: OffsetDateTime::now_utc(),
            stale_ticks: 0,
            last_error: None,
        };
        let (publisher, _) = watch::channel(Arc::new(initial));

        Self {
            source,
            entities,
            entity_ids,
            baselines,
            lookback: time::Duration::hours(24),
            granularity: time::Duration::hours(1),
            window: FetchWindow::SinceLastTick,
            known: BTreeMap::new(),
            last_success: None,
            tick: 0,
            stale_ticks: 0,
            publisher,
        }
    }

    pub fn with_lookback(mut self, lookback: time::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Window starts are rounded down to a multiple of `granularity`, which
    /// keeps the cache key stable between ticks. Zero disables rounding.
    pub fn with_window_granularity(mut self, granularity: time::Duration) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_fetch_window(mut self, window: FetchWindow) -> Self {
        self.window = window;
        self
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Readers of the published state. Every tick replaces the state as a whole.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardState>> {
        self.publisher.subscribe()
    }

    pub fn current(&self) -> Arc<DashboardState> {
        self.publisher.borrow().clone()
    }

    /// Drops cached readings so the next tick goes to the backend.
    pub fn invalidate_cache(&self) {
        self.source.invalidate();
    }

    /// Runs one tick and publishes its result.
    pub async fn refresh(&mut self) -> Arc<DashboardState> {
        self.refresh_at(OffsetDateTime::now_utc()).await
    }

    pub async fn refresh_at(&mut self, now: OffsetDateTime) -> Arc<DashboardState> {
        self.run_tick(now).await.0
    }

    /// First tick at startup. Unlike later ticks, a failure is an error here
    /// unless an earlier tick already succeeded; a misconfigured backend always is.
    pub async fn prime(&mut self) -> Result<Arc<DashboardState>, SourceError> {
        let cold = self.last_success.is_none();
        match self.run_tick(OffsetDateTime::now_utc()).await {
            (_, Some(e)) if cold || matches!(e, SourceError::Configuration(_)) => Err(e),
            (state, _) => Ok(state),
        }
    }

    fn window_start(&self, now: OffsetDateTime) -> OffsetDateTime {
        truncate(now - self.lookback, self.granularity)
    }

    fn since(&self, now: OffsetDateTime) -> OffsetDateTime {
        match (self.window, self.last_success) {
            (FetchWindow::SinceLastTick, Some(last)) => truncate(last, self.granularity),
            _ => self.window_start(now),
        }
    }

    fn remember(&mut self, batch: ReadingBatch) {
        for (entity_id, readings) in batch {
            if !self.entity_ids.contains(&entity_id) {
                continue;
            }
            for metric in MetricKind::ALL {
                let Some(latest) = transform::latest_reading(&readings, metric) else { continue };
                let key = (entity_id.clone(), metric);
                if self.known.get(&key).map_or(true, |k| latest.timestamp >= k.timestamp) {
                    self.known.insert(key, latest.clone());
                }
            }
        }
    }

    async fn run_tick(&mut self, now: OffsetDateTime) -> (Arc<DashboardState>, Option<SourceError>) {
        let started = Instant::now();
        self.tick += 1;
        let since = self.since(now);

        let fetched = self.source.fetch(&self.entity_ids, since).await;
        let (state, error) = match fetched {
            Ok(batch) => {
                self.remember(transform::validated(batch));
                let snapshot = self.compute(now);
                self.last_success = Some(now);
                self.stale_ticks = 0;
                tracing::info!(tick = self.tick, entities = self.entities.len(), %since, "KPI snapshot refreshed");
                (
                    DashboardState {
                        snapshot,
                        tick: self.tick,
                        computed_at: now,
                        stale_ticks: 0,
                        last_error: None,
                    },
                    None,
                )
            }
            Err(e) => {
                self.stale_ticks += 1;
                metrics::counter!("kpi_refresh_stale_total").increment(1);
                tracing::warn!(
                    tick = self.tick,
                    stale_ticks = self.stale_ticks,
                    error = %e,
                    "refresh failed, keeping previous snapshot"
                );
                let previous = self.publisher.borrow().snapshot.clone();
                (
                    DashboardState {
                        snapshot: previous,
                        tick: self.tick,
                        computed_at: now,
                        stale_ticks: self.stale_ticks,
                        last_error: Some(e.to_string()),
                    },
                    Some(e),
                )
            }
        };

        let state = Arc::new(state);
        self.publisher.send_replace(state.clone());

        metrics::counter!("kpi_refresh_total").increment(1);
        metrics::histogram!("kpi_refresh_duration_seconds").record(started.elapsed().as_secs_f64());

        (state, error)
    }

    fn compute(&self, now: OffsetDateTime) -> KpiSnapshot {
        let horizon = self.window_start(now);
        self.entities
            .iter()
            .flat_map(|entity| {
                MetricKind::ALL.into_iter().map(move |metric| {
                    let baseline = self.baselines.for_metric(metric);
                    let kpi = self
                        .known
                        .get(&(entity.id.clone(), metric))
                        .filter(|r| r.timestamp >= horizon)
                        .map(|r| Kpi::from_value(transform::to_kwh(r.value, entity.scale_for(metric)), baseline))
                        .unwrap_or_else(|| Kpi::missing(baseline));
                    (entity.id.clone(), metric, kpi)
                })
            })
            .collect()
    }
}

/// Rounds `ts` down to a multiple of `step` since the Unix epoch.
fn truncate(ts: OffsetDateTime, step: time::Duration) -> OffsetDateTime {
    let step = step.whole_seconds();
    if step <= 0 {
        return ts;
    }
    let secs = ts.unix_timestamp();
    OffsetDateTime::from_unix_timestamp(secs - secs.rem_euclid(step)).unwrap_or(ts)
}
