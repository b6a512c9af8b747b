//! In-memory stand-in for the dashboard's local mock REST store.
//!
//! Routes:
//! - `GET /energy_data` published readings, oldest first, capped at the
//!   store's history limit.
//! - `GET /latest_readings` the most recently published set.
//! - `PUT /latest_readings` replaces the latest set and appends it to the history.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use energy_client::domain::Reading;
use tokio::sync::RwLock;

use crate::transform::validate_reading;

#[derive(Default)]
struct Store {
    history: Vec<Reading>,
    latest: Vec<Reading>,
}

/// Readings kept in `history` unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct MockStore {
    inner: Arc<RwLock<Store>>,
    history_limit: usize,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl MockStore {
    pub fn with_readings(readings: Vec<Reading>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Store {
                history: readings.clone(),
                latest: readings,
            })),
            ..Self::default()
        }
    }

    /// Oldest readings are dropped once `history` holds more than `limit`.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/energy_data", get(energy_data))
            .route("/latest_readings", get(latest_readings).put(put_latest_readings))
            .with_state(self)
    }
}

async fn energy_data(State(store): State<MockStore>) -> Json<Vec<Reading>> {
    Json(store.inner.read().await.history.clone())
}

async fn latest_readings(State(store): State<MockStore>) -> Json<Vec<Reading>> {
    Json(store.inner.read().await.latest.clone())
}

async fn put_latest_readings(
    State(store): State<MockStore>,
    Json(payload): Json<Vec<Reading>>,
) -> Result<StatusCode, (StatusCode, String)> {
    if let Some((reading, e)) = payload
        .iter()
        .find_map(|r| validate_reading(r).err().map(|e| (r, e)))
    {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("reading for '{}' rejected: {e}", reading.entity_id),
        ));
    }

    let mut guard = store.inner.write().await;
    guard.history.extend(payload.iter().cloned());
    let overflow = guard.history.len().saturating_sub(store.history_limit);
    guard.history.drain(..overflow);
    guard.latest = payload;
    tracing::info!(readings = guard.latest.len(), "latest readings replaced");

    Ok(StatusCode::NO_CONTENT)
}
