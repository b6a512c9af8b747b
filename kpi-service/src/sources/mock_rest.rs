use std::{collections::BTreeSet, time::Duration};

use energy_client::domain::{EntityId, Reading, ReadingBatch};
use time::OffsetDateTime;

use super::{group_readings, ReadingSource, SourceError};
use crate::config::MockRestConfig;

/// Reading source polling a mock REST store's `GET /latest_readings`.
pub struct MockRestSource {
    client: reqwest::Client,
    latest_url: String,
}

impl MockRestSource {
    pub fn from_config(cfg: &MockRestConfig) -> Result<Self, SourceError> {
        let base = reqwest::Url::parse(&cfg.base_url)
            .map_err(|e| SourceError::Configuration(format!("invalid mock store url '{}': {e}", cfg.base_url)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| SourceError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            latest_url: format!("{}/latest_readings", base.as_str().trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl ReadingSource for MockRestSource {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        let response = self
            .client
            .get(&self.latest_url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("mock store request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("mock store returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to read mock store body: {e}")))?;
        let readings: Vec<Reading> = serde_json::from_slice(&body)
            .map_err(|e| SourceError::MalformedData(format!("unexpected mock store payload: {e}")))?;

        Ok(group_readings(readings, entity_ids, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock_store::MockStore, sources::testing::spawn_backend};
    use axum::{routing::get, Router};
    use energy_client::domain::MetricKind;
    use time::macros::datetime;

    fn source(base_url: String) -> MockRestSource {
        MockRestSource::from_config(&MockRestConfig {
            base_url,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_latest_readings_from_store() {
        let store = MockStore::with_readings(vec![
            Reading::new("hiltrup", MetricKind::Gas, datetime!(2024-01-01 10:00:00 UTC), 30.0),
            Reading::new("prefab", MetricKind::Gas, datetime!(2024-01-01 10:00:00 UTC), 20.0),
            Reading::new("fab", MetricKind::Gas, datetime!(2024-01-01 10:00:00 UTC), 10.0),
        ]);
        let base = spawn_backend(store.router()).await;
        let ids = BTreeSet::from([EntityId::from("hiltrup"), EntityId::from("prefab")]);

        let batch = source(base).fetch(&ids, datetime!(2024-01-01 00:00:00 UTC)).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch["hiltrup"][0].value, 30.0);
        assert_eq!(batch["prefab"][0].value, 20.0);
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed_data() {
        let base = spawn_backend(Router::new().route("/latest_readings", get(|| async { "{\"oops\": 1}" }))).await;
        let ids = BTreeSet::from([EntityId::from("hiltrup")]);

        let err = source(base).fetch(&ids, OffsetDateTime::UNIX_EPOCH).await.unwrap_err();
        assert!(matches!(err, SourceError::MalformedData(_)));
    }

    #[tokio::test]
    async fn unreachable_store_is_source_unavailable() {
        // Bind and drop a listener to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let ids = BTreeSet::from([EntityId::from("hiltrup")]);

        let err = source(format!("http://127.0.0.1:{port}"))
            .fetch(&ids, OffsetDateTime::UNIX_EPOCH)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn invalid_url_is_configuration_error() {
        let err = MockRestSource::from_config(&MockRestConfig {
            base_url: "not a url".to_string(),
            timeout_secs: 5,
        })
        .err()
        .unwrap();
        assert!(matches!(err, SourceError::Configuration(_)));
    }
}
