use anyhow::Result;
use kpi_service::{
    aggregator::KpiAggregator,
    api::{self, AppState},
    config::AppConfig,
    display::LogDisplay,
    metrics_server, observability,
    scheduler::Scheduler,
    sources::{CachedSource, ConfiguredSource},
    summary::PeriodSummarizer,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let cfg = AppConfig::load()?;
    observability::init_tracing(cfg.logging.format);

    let cancel = CancellationToken::new();
    let prometheus = metrics_server::install(cancel.clone())?;

    let source = ConfiguredSource::from_config(&cfg.source)?;
    tracing::info!(
        source = source.kind(),
        entities = cfg.entities.len(),
        ttl_secs = cfg.cache.ttl_secs,
        "starting kpi-service"
    );
    let source = CachedSource::new(source, cfg.cache.ttl());

    let mut aggregator = KpiAggregator::new(source, cfg.entities.clone(), cfg.baselines)
        .with_lookback(cfg.refresh.lookback())
        .with_window_granularity(cfg.refresh.window_granularity())
        .with_fetch_window(cfg.refresh.fetch_window);

    // An unreachable or misconfigured backend halts startup; later failures
    // only mark the published state stale.
    aggregator.prime().await?;

    let scheduler = Scheduler::new(aggregator, cfg.refresh.interval()).with_display(LogDisplay::new(cfg.tiles.clone()));
    let state = AppState::new(
        // Subscribed before the scheduler takes ownership of the aggregator.
        scheduler.subscribe(),
        cfg.entities.clone(),
        cfg.tiles.clone(),
        scheduler.refresh_handle(),
        PeriodSummarizer::new(cfg.summary.clone()),
    )
    .with_prometheus(prometheus);

    let api_task = tokio::spawn(api::serve(cfg.api.bind_addr.clone(), api::router(state), cancel.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    let aggregator = scheduler_task.await?;
    api_task.await??;
    tracing::info!(ticks = aggregator.ticks(), "kpi-service stopped");

    Ok(())
}
