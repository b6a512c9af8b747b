use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use energy_client::domain::{EntityId, Reading, ReadingBatch};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use super::{group_readings, ReadingSource, SourceError};
use crate::config::{SmardChannel, SmardConfig};

/// Reading source backed by the SMARD energy-market chart API.
///
/// Each series is split into chunks; `index_{resolution}.json` lists chunk
/// start times (Unix milliseconds) and every chunk file holds
/// `[timestamp_ms, value | null]` pairs.
pub struct SmardSource {
    client: reqwest::Client,
    base_url: String,
    region: String,
    resolution: String,
    channels: Vec<SmardChannel>,
}

#[derive(serde::Deserialize)]
struct IndexResponse {
    timestamps: Vec<i64>,
}

#[derive(serde::Deserialize)]
struct SeriesResponse {
    series: Vec<(i64, Option<f64>)>,
}

impl SmardSource {
    pub fn from_config(cfg: &SmardConfig) -> Result<Self, SourceError> {
        if cfg.channels.is_empty() {
            return Err(SourceError::Configuration("smard source needs at least one channel".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| SourceError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            region: cfg.region.clone(),
            resolution: cfg.resolution.clone(),
            channels: cfg.channels.clone(),
        })
    }

    fn index_url(&self, filter: u32) -> String {
        format!("{}/{filter}/{}/index_{}.json", self.base_url, self.region, self.resolution)
    }

    fn chunk_url(&self, filter: u32, chunk_start: i64) -> String {
        format!(
            "{base}/{filter}/{region}/{filter}_{region}_{resolution}_{chunk_start}.json",
            base = self.base_url,
            region = self.region,
            resolution = self.resolution,
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("GET {url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to read body of {url}: {e}")))?;

        serde_json::from_slice(&body).map_err(|e| SourceError::MalformedData(format!("unexpected payload from {url}: {e}")))
    }

    /// All non-null points of one filter's series at or after `since`.
    async fn series_points(&self, filter: u32, since: OffsetDateTime) -> Result<Vec<(OffsetDateTime, f64)>, SourceError> {
        let index: IndexResponse = self.get_json(&self.index_url(filter)).await?;
        let since_ms = (since.unix_timestamp_nanos() / 1_000_000) as i64;

        let mut points = Vec::new();
        for &chunk_start in chunks_covering(&index.timestamps, since_ms) {
            let chunk: SeriesResponse = self.get_json(&self.chunk_url(filter, chunk_start)).await?;
            for (ts_ms, value) in chunk.series {
                let Some(value) = value else { continue };
                if ts_ms < since_ms {
                    continue;
                }
                points.push((from_unix_millis(ts_ms)?, value));
            }
        }

        tracing::debug!(filter, points = points.len(), "fetched SMARD series");
        Ok(points)
    }
}

/// Chunks whose time span can contain points at or after `since_ms`.
///
/// A chunk spans from its start to the next chunk's start, so the search
/// begins at the last chunk starting at or before `since_ms`.
fn chunks_covering(timestamps: &[i64], since_ms: i64) -> &[i64] {
    let first = timestamps
        .iter()
        .rposition(|&ts| ts <= since_ms)
        .unwrap_or(0);
    timestamps.get(first..).unwrap_or(&[])
}

fn from_unix_millis(ts_ms: i64) -> Result<OffsetDateTime, SourceError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts_ms) * 1_000_000)
        .map_err(|e| SourceError::MalformedData(format!("invalid timestamp {ts_ms}: {e}")))
}

#[async_trait::async_trait]
impl ReadingSource for SmardSource {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        // Several channels usually share one series (e.g. two sites derived from total load).
        let mut series: BTreeMap<u32, Vec<(OffsetDateTime, f64)>> = BTreeMap::new();
        let mut readings = Vec::new();

        for channel in self.channels.iter().filter(|c| entity_ids.contains(&c.entity)) {
            if !series.contains_key(&channel.filter) {
                let points = self.series_points(channel.filter, since).await?;
                series.insert(channel.filter, points);
            }
            readings.extend(
                series[&channel.filter]
                    .iter()
                    .map(|&(ts, value)| Reading::new(channel.entity.clone(), channel.metric, ts, value)),
            );
        }

        Ok(group_readings(readings, entity_ids, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::spawn_backend;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use energy_client::domain::MetricKind;
    use serde_json::{json, Value};
    use time::macros::datetime;

    // 2024-01-01T00:00:00Z and one week later.
    const WEEK_1: i64 = 1_704_067_200_000;
    const WEEK_2: i64 = WEEK_1 + 7 * 24 * 3_600_000;
    const HOUR: i64 = 3_600_000;

    async fn smard_stub(Path((filter, region, file)): Path<(u32, String, String)>) -> Result<Json<Value>, StatusCode> {
        assert_eq!(region, "DE");
        match (filter, file.as_str()) {
            (410, "index_hour.json") | (4068, "index_hour.json") => Ok(Json(json!({ "timestamps": [WEEK_1, WEEK_2] }))),
            (410, f) if f == format!("410_DE_hour_{WEEK_1}.json") => {
                Ok(Json(json!({ "series": [[WEEK_1, 100.0], [WEEK_1 + HOUR, 110.0]] })))
            }
            (410, f) if f == format!("410_DE_hour_{WEEK_2}.json") => {
                Ok(Json(json!({ "series": [[WEEK_2, 120.0], [WEEK_2 + HOUR, null]] })))
            }
            (4068, f) if f == format!("4068_DE_hour_{WEEK_2}.json") => Ok(Json(json!({ "series": [[WEEK_2, 30.0]] }))),
            (4068, _) => Ok(Json(json!({ "meta_data": {} }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    fn config(base_url: String, channels: Vec<SmardChannel>) -> SmardConfig {
        SmardConfig {
            base_url,
            region: "DE".to_string(),
            resolution: "hour".to_string(),
            timeout_secs: 5,
            channels,
        }
    }

    fn channel(entity: &str, metric: MetricKind, filter: u32) -> SmardChannel {
        SmardChannel {
            entity: entity.into(),
            metric,
            filter,
        }
    }

    #[test]
    fn chunk_selection_starts_at_chunk_containing_since() {
        let ts = [10, 20, 30];
        assert_eq!(chunks_covering(&ts, 5), &[10, 20, 30]);
        assert_eq!(chunks_covering(&ts, 20), &[20, 30]);
        assert_eq!(chunks_covering(&ts, 25), &[20, 30]);
        assert_eq!(chunks_covering(&ts, 99), &[30]);
        assert!(chunks_covering(&[], 99).is_empty());
    }

    #[tokio::test]
    async fn fetch_maps_shared_series_onto_channels_and_skips_nulls() {
        let base = spawn_backend(Router::new().route("/:filter/:region/:file", get(smard_stub))).await;
        let source = SmardSource::from_config(&config(
            base,
            vec![
                channel("hiltrup", MetricKind::Power, 410),
                channel("prefab", MetricKind::Power, 410),
                channel("fab", MetricKind::Power, 410),
            ],
        ))
        .unwrap();
        let ids = BTreeSet::from([EntityId::from("hiltrup"), EntityId::from("prefab")]);

        // One hour into the first week: the first point is too old.
        let since = datetime!(2024-01-01 01:00:00 UTC);
        let batch = source.fetch(&ids, since).await.unwrap();

        assert_eq!(batch.len(), 2);
        let values: Vec<f64> = batch["hiltrup"].iter().map(|r| r.value).collect();
        assert_eq!(values, [110.0, 120.0]);
        assert_eq!(batch["prefab"].len(), 2);
        assert_eq!(batch["prefab"][1].timestamp, datetime!(2024-01-08 00:00:00 UTC));
    }

    #[tokio::test]
    async fn missing_series_field_is_malformed_data() {
        let base = spawn_backend(Router::new().route("/:filter/:region/:file", get(smard_stub))).await;
        let source = SmardSource::from_config(&config(base, vec![channel("hiltrup", MetricKind::Gas, 4068)])).unwrap();
        let ids = BTreeSet::from([EntityId::from("hiltrup")]);

        let err = source.fetch(&ids, datetime!(2024-01-01 00:00:00 UTC)).await.unwrap_err();
        assert!(matches!(err, SourceError::MalformedData(_)), "{err:?}");
    }

    #[tokio::test]
    async fn http_error_is_source_unavailable() {
        let base = spawn_backend(Router::new().route("/:filter/:region/:file", get(smard_stub))).await;
        let source = SmardSource::from_config(&config(base, vec![channel("hiltrup", MetricKind::Power, 999)])).unwrap();
        let ids = BTreeSet::from([EntityId::from("hiltrup")]);

        let err = source.fetch(&ids, datetime!(2024-01-01 00:00:00 UTC)).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(msg) if msg.contains("404")));
    }

    #[test]
    fn channels_are_required() {
        let err = SmardSource::from_config(&config("http://localhost".to_string(), Vec::new()))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Configuration(_)));
    }
}
