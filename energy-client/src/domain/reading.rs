use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::EntityId;

/// Kind of quantity a reading measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Power,
    Gas,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Power, MetricKind::Gas];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Power => "power",
            MetricKind::Gas => "gas",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown metric kind '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "power" => Ok(MetricKind::Power),
            "gas" => Ok(MetricKind::Gas),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// One timestamped raw measurement, in the backend's native unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub entity_id: EntityId,
    pub metric: MetricKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

impl Reading {
    pub fn new(
        entity_id: impl Into<EntityId>,
        metric: MetricKind,
        timestamp: OffsetDateTime,
        value: f64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric,
            timestamp,
            value,
        }
    }
}

/// Readings grouped by the entity they belong to, in the order the backend issued them.
pub type ReadingBatch = BTreeMap<EntityId, Vec<Reading>>;
