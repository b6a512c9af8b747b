//! JSON API the presentation layer polls.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use energy_client::domain::{
    Entity, EntityId, EntityKind, Kpi, MetricKind, SelectedView, Share, UnknownMetric, ViewError,
};
use futures::{Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};
use tokio::sync::{watch, RwLock};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::DashboardState,
    config::TileConfig,
    display::{render_tiles, Tile},
    scheduler::RefreshHandle,
    summary::{Period, PeriodSummarizer, PeriodSummary, SummaryError},
};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<ViewError> for ApiError {
    fn from(e: ViewError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<UnknownMetric> for ApiError {
    fn from(e: UnknownMetric) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<SummaryError> for ApiError {
    fn from(e: SummaryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Clone)]
pub struct AppState {
    states: watch::Receiver<Arc<DashboardState>>,
    entities: Arc<Vec<Entity>>,
    tiles: Arc<Vec<TileConfig>>,
    view: Arc<RwLock<Option<SelectedView>>>,
    refresh: RefreshHandle,
    summarizer: Arc<PeriodSummarizer>,
    prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        states: watch::Receiver<Arc<DashboardState>>,
        entities: Vec<Entity>,
        tiles: Vec<TileConfig>,
        refresh: RefreshHandle,
        summarizer: PeriodSummarizer,
    ) -> Self {
        Self {
            states,
            entities: Arc::new(entities),
            tiles: Arc::new(tiles),
            view: Arc::new(RwLock::new(None)),
            refresh,
            summarizer: Arc::new(summarizer),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    fn current(&self) -> Arc<DashboardState> {
        self.states.borrow().clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/kpis", get(kpis))
        .route("/kpis/stream", get(kpi_stream))
        .route("/tiles", get(tiles))
        .route("/entities", get(entities))
        .route("/view", get(get_view).put(put_view))
        .route("/distribution", get(distribution))
        .route("/summary", get(summary))
        .route("/refresh", post(refresh))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn serve(bind_addr: String, app: Router, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api.bind_addr '{bind_addr}': {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn kpis(State(state): State<AppState>) -> Json<DashboardState> {
    Json(DashboardState::clone(&state.current()))
}

async fn kpi_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.states.clone()).map(|s| {
        let event = Event::default().event("kpis").json_data(&*s).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode dashboard state");
            Event::default().event("error").data("encoding failed")
        });
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn tiles(State(state): State<AppState>) -> Json<Vec<Tile>> {
    Json(render_tiles(&state.tiles, &state.current().snapshot))
}

#[derive(Serialize)]
struct Marker {
    id: EntityId,
    name: String,
    kind: EntityKind,
    latitude: f64,
    longitude: f64,
}

async fn entities(State(state): State<AppState>) -> Json<Vec<Marker>> {
    Json(
        state
            .entities
            .iter()
            .map(|e| Marker {
                id: e.id.clone(),
                name: e.name.clone(),
                kind: e.kind,
                latitude: e.latitude,
                longitude: e.longitude,
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct EntityKpis {
    id: EntityId,
    name: String,
    kpis: Vec<MetricKpi>,
}

#[derive(Serialize)]
struct MetricKpi {
    metric: MetricKind,
    #[serde(flatten)]
    kpi: Kpi,
}

#[derive(Serialize)]
struct ViewResponse {
    view: Option<SelectedView>,
    entities: Vec<EntityKpis>,
}

fn view_response(state: &AppState, view: Option<SelectedView>) -> ViewResponse {
    let current = state.current();
    let entities = view
        .as_ref()
        .map(|v| v.entities(&state.entities))
        .unwrap_or_default()
        .into_iter()
        .map(|e| EntityKpis {
            id: e.id.clone(),
            name: e.name.clone(),
            kpis: current
                .snapshot
                .entity(e.id.as_str())
                .map(|metrics| metrics.iter().map(|(m, k)| MetricKpi { metric: *m, kpi: *k }).collect())
                .unwrap_or_default(),
        })
        .collect();
    ViewResponse { view, entities }
}

async fn get_view(State(state): State<AppState>) -> Json<ViewResponse> {
    let view = state.view.read().await.clone();
    Json(view_response(&state, view))
}

/// The only place the selected view changes.
async fn put_view(State(state): State<AppState>, Json(view): Json<SelectedView>) -> Result<Json<ViewResponse>, ApiError> {
    view.validate(&state.entities)?;
    *state.view.write().await = Some(view.clone());
    tracing::debug!(?view, "view selected");
    Ok(Json(view_response(&state, Some(view))))
}

#[derive(Deserialize)]
struct DistributionQuery {
    metric: String,
}

async fn distribution(
    State(state): State<AppState>,
    Query(query): Query<DistributionQuery>,
) -> Result<Json<Vec<Share>>, ApiError> {
    let metric: MetricKind = query.metric.parse()?;
    Ok(Json(state.current().snapshot.distribution(metric)))
}

#[derive(Deserialize)]
struct SummaryQuery {
    start: Option<String>,
    end: Option<String>,
    date: Option<String>,
}

fn parse_date(field: &str, value: &str) -> Result<Date, ApiError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|e| ApiError::BadRequest(format!("invalid {field} '{value}': {e}")))
}

fn period_from_query(query: &SummaryQuery) -> Result<Period, ApiError> {
    match (&query.start, &query.end, &query.date) {
        (None, None, Some(date)) => Ok(Period::Day(parse_date("date", date)?)),
        (Some(start), Some(end), None) => Ok(Period::Range {
            start: parse_date("start", start)?,
            end: parse_date("end", end)?,
        }),
        _ => Err(ApiError::BadRequest("pass either `date` or both `start` and `end`".to_string())),
    }
}

async fn summary(State(state): State<AppState>, Query(query): Query<SummaryQuery>) -> Result<Json<PeriodSummary>, ApiError> {
    let period = period_from_query(&query)?;
    Ok(Json(state.summarizer.summarize(period)?))
}

async fn refresh(State(state): State<AppState>) -> StatusCode {
    state.refresh.request();
    StatusCode::ACCEPTED
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or_else(|| ApiError::NotFound("metrics recorder not installed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::KpiAggregator,
        config::SummaryConfig,
        sources::testing::{spawn_backend, ScriptedSource},
    };
    use energy_client::domain::{Baselines, Reading};
    use serde_json::{json, Value};
    use time::macros::datetime;

    fn sites() -> Vec<Entity> {
        vec![
            Entity::new("solar_roof", "PV Dach", 51.9375, 7.6257).with_kind(EntityKind::Solar),
            Entity::new("hiltrup", "Hiltrup", 51.9475, 7.6357),
            Entity::new("prefab", "Pre Fab", 51.9275, 7.6157),
        ]
    }

    async fn api() -> (String, KpiAggregator<Arc<ScriptedSource>>, RefreshHandle) {
        let ts = datetime!(2024-01-01 12:00:00 UTC);
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            Reading::new("hiltrup", MetricKind::Power, ts, 30.0),
            Reading::new("prefab", MetricKind::Power, ts, 10.0),
            Reading::new("solar_roof", MetricKind::Power, ts, 12.5),
        ])]));
        let mut agg = KpiAggregator::new(source, sites(), Baselines::default());
        agg.refresh_at(ts).await;

        let refresh = RefreshHandle::default();
        let tiles = vec![TileConfig {
            entity: "hiltrup".into(),
            metric: MetricKind::Power,
            label: "Stromverbrauch Hiltrup".to_string(),
        }];
        let state = AppState::new(
            agg.subscribe(),
            sites(),
            tiles,
            refresh.clone(),
            PeriodSummarizer::new(SummaryConfig {
                jitter_ratio: 0.0,
                ..SummaryConfig::default()
            }),
        );
        (spawn_backend(router(state)).await, agg, refresh)
    }

    async fn get_json(url: String) -> (reqwest::StatusCode, Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn kpis_returns_published_state() {
        let (base, _agg, _) = api().await;

        let (status, body) = get_json(format!("{base}/kpis")).await;

        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["tick"], 1);
        assert_eq!(body["stale_ticks"], 0);
        assert_eq!(body["snapshot"]["hiltrup"]["power"]["current_value"], 30.0);
        assert_eq!(body["snapshot"]["hiltrup"]["gas"]["baseline_delta"], -5.0);
    }

    #[tokio::test]
    async fn tiles_and_entities_are_served() {
        let (base, _agg, _) = api().await;

        let (_, tiles) = get_json(format!("{base}/tiles")).await;
        assert_eq!(tiles, json!([{ "label": "Stromverbrauch Hiltrup", "value": "30kWh", "delta": 20 }]));

        let (_, markers) = get_json(format!("{base}/entities")).await;
        assert_eq!(markers.as_array().unwrap().len(), 3);
        assert_eq!(markers[0]["kind"], "solar");
        assert_eq!(markers[1]["latitude"], 51.9475);
    }

    #[tokio::test]
    async fn view_selection_is_validated_and_kept() {
        let (base, _agg, _) = api().await;
        let client = reqwest::Client::new();

        let (_, empty) = get_json(format!("{base}/view")).await;
        assert_eq!(empty["view"], Value::Null);

        let rejected = client
            .put(format!("{base}/view"))
            .json(&json!({ "kind": "building", "entity": "solar_roof" }))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);

        let accepted = client
            .put(format!("{base}/view"))
            .json(&json!({ "kind": "building", "entity": "hiltrup" }))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), reqwest::StatusCode::OK);

        let (_, view) = get_json(format!("{base}/view")).await;
        assert_eq!(view["view"], json!({ "kind": "building", "entity": "hiltrup" }));
        assert_eq!(view["entities"][0]["id"], "hiltrup");
        assert_eq!(view["entities"][0]["kpis"][0]["metric"], "power");
        assert_eq!(view["entities"][0]["kpis"][0]["current_value"], 30.0);
    }

    #[tokio::test]
    async fn distribution_by_metric() {
        let (base, _agg, _) = api().await;

        let (_, shares) = get_json(format!("{base}/distribution?metric=power")).await;
        let shares = shares.as_array().unwrap();
        let total: f64 = shares.iter().map(|s| s["percent"].as_f64().unwrap()).sum();
        assert!((total - 100.0).abs() < 1e-9);

        let (status, _) = get_json(format!("{base}/distribution?metric=heat")).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_accepts_day_or_range() {
        let (base, _agg, _) = api().await;

        let (_, day) = get_json(format!("{base}/summary?date=2023-01-01")).await;
        assert_eq!(day["energy_kwh"], json!({ "value": 1000, "delta": 100 }));

        let (_, range) = get_json(format!("{base}/summary?start=2023-01-01&end=2023-12-31")).await;
        assert_eq!(range["cost_eur"]["value"], 1995);

        let (status, body) = get_json(format!("{base}/summary?start=2023-01-01")).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("date"));
    }

    #[tokio::test]
    async fn refresh_is_accepted() {
        let (base, _agg, _refresh) = api().await;

        let response = reqwest::Client::new().post(format!("{base}/refresh")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (base, _agg, _) = api().await;

        let (status, _) = get_json(format!("{base}/metrics")).await;
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    }
}
