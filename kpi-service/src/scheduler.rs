use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Notify},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::{DashboardState, KpiAggregator},
    display::SnapshotDisplay,
    sources::ReadingSource,
};

/// Requests an out-of-band refresh that bypasses the reading cache.
#[derive(Clone, Default)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    pub fn request(&self) {
        // A request made while a tick is running is kept and served right after it.
        self.notify.notify_one();
    }
}

/// Drives [`KpiAggregator::refresh`] on a fixed interval.
///
/// Ticks never overlap: a slow refresh delays the next tick instead of
/// queueing a burst. Cancellation is observed between ticks only.
pub struct Scheduler<S> {
    aggregator: KpiAggregator<S>,
    interval: Duration,
    displays: Vec<Box<dyn SnapshotDisplay>>,
    refresh: RefreshHandle,
}

impl<S: ReadingSource + 'static> Scheduler<S> {
    pub fn new(aggregator: KpiAggregator<S>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            displays: Vec::new(),
            refresh: RefreshHandle::default(),
        }
    }

    pub fn with_display(mut self, display: impl SnapshotDisplay + 'static) -> Self {
        self.displays.push(Box::new(display));
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardState>> {
        self.aggregator.subscribe()
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.refresh.clone()
    }

    /// Runs until `cancel` fires and hands the aggregator back.
    ///
    /// The first tick runs immediately unless the aggregator has already
    /// ticked (e.g. primed at startup), in which case the current state is
    /// shown and the loop waits one full interval.
    pub async fn run(mut self, cancel: CancellationToken) -> KpiAggregator<S> {
        let start = if self.aggregator.ticks() == 0 {
            Instant::now()
        } else {
            self.show_current();
            Instant::now() + self.interval
        };
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs_f64(), "refresh loop started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.refresh.notify.notified() => {
                    tracing::info!("manual refresh requested");
                    self.aggregator.invalidate_cache();
                    ticker.reset();
                }
                _ = ticker.tick() => {}
            }

            self.aggregator.refresh().await;
            self.show_current();
        }
        tracing::info!(ticks = self.aggregator.ticks(), "refresh loop stopped");

        self.aggregator
    }

    fn show_current(&self) {
        let state = self.aggregator.current();
        for display in &self.displays {
            display.show(&state);
        }
    }
}
