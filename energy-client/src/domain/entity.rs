use std::{borrow::Borrow, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use super::MetricKind;

/// Stable identifier of a monitored site, e.g. `hiltrup` or `solar_roof`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Building,
    Solar,
}

/// A monitored building or generation site. Static configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    pub latitude: f64,
    pub longitude: f64,
    /// Factor converting the backend's native unit into kWh.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Per-metric overrides of `scale`.
    #[serde(default)]
    pub metric_scale: BTreeMap<MetricKind, f64>,
}

fn default_scale() -> f64 {
    1.0
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EntityKind::Building,
            latitude,
            longitude,
            scale: default_scale(),
            metric_scale: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_metric_scale(mut self, metric: MetricKind, scale: f64) -> Self {
        self.metric_scale.insert(metric, scale);
        self
    }

    pub fn scale_for(&self, metric: MetricKind) -> f64 {
        self.metric_scale.get(&metric).copied().unwrap_or(self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_scale_overrides_entity_scale() {
        let entity = Entity::new("prefab", "Pre Fab", 51.9275, 7.6157)
            .with_scale(0.5)
            .with_metric_scale(MetricKind::Gas, 0.25);

        assert_eq!(entity.scale_for(MetricKind::Power), 0.5);
        assert_eq!(entity.scale_for(MetricKind::Gas), 0.25);
    }

    #[test]
    fn entity_defaults_apply_when_deserializing() {
        let entity: Entity = serde_json::from_str(
            r#"{"id": "fab", "name": "Fab", "latitude": 51.9325, "longitude": 7.6307}"#,
        )
        .unwrap();

        assert_eq!(entity.id.as_str(), "fab");
        assert_eq!(entity.kind, EntityKind::Building);
        assert_eq!(entity.scale, 1.0);
        assert!(entity.metric_scale.is_empty());
    }
}
