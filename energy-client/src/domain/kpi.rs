use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Entity, EntityId, MetricKind};

/// Display-ready value for one entity and metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    /// Latest reading converted to kWh.
    pub current_value: f64,
    /// `current_value` minus the configured baseline of the metric.
    pub baseline_delta: f64,
}

impl Kpi {
    pub fn from_value(current_value: f64, baseline: f64) -> Self {
        Self {
            current_value,
            baseline_delta: current_value - baseline,
        }
    }

    /// The value used when no reading exists for the entity and metric.
    pub fn missing(baseline: f64) -> Self {
        Self::from_value(0.0, baseline)
    }
}

/// Fixed per-metric expectations KPIs are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    pub power: f64,
    pub gas: f64,
}

impl Default for Baselines {
    fn default() -> Self {
        Self { power: 10.0, gas: 5.0 }
    }
}

impl Baselines {
    pub fn for_metric(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Power => self.power,
            MetricKind::Gas => self.gas,
        }
    }
}

/// Share of one entity in the summed current values of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub entity_id: EntityId,
    pub percent: f64,
}

/// KPIs of every entity and metric for a single refresh tick.
///
/// A snapshot is built in one go from an iterator and cannot be modified
/// afterwards; a new tick produces a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KpiSnapshot {
    kpis: BTreeMap<EntityId, BTreeMap<MetricKind, Kpi>>,
}

impl KpiSnapshot {
    /// Snapshot with the missing-reading default for every entity and metric.
    pub fn defaults_for<'a>(entities: impl IntoIterator<Item = &'a Entity>, baselines: &Baselines) -> Self {
        entities
            .into_iter()
            .flat_map(|e| {
                MetricKind::ALL
                    .into_iter()
                    .map(move |m| (e.id.clone(), m, Kpi::missing(baselines.for_metric(m))))
            })
            .collect()
    }

    pub fn get(&self, entity_id: &str, metric: MetricKind) -> Option<&Kpi> {
        self.kpis.get(entity_id).and_then(|metrics| metrics.get(&metric))
    }

    pub fn entity(&self, entity_id: &str) -> Option<&BTreeMap<MetricKind, Kpi>> {
        self.kpis.get(entity_id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.kpis.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, MetricKind, &Kpi)> {
        self.kpis
            .iter()
            .flat_map(|(id, metrics)| metrics.iter().map(move |(m, kpi)| (id, *m, kpi)))
    }

    pub fn len(&self) -> usize {
        self.kpis.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentage share of each entity in the total of `metric`.
    ///
    /// Negative values count as zero. When the total is zero every share is zero.
    pub fn distribution(&self, metric: MetricKind) -> Vec<Share> {
        let values: Vec<(&EntityId, f64)> = self
            .kpis
            .iter()
            .filter_map(|(id, metrics)| metrics.get(&metric).map(|k| (id, k.current_value.max(0.0))))
            .collect();
        let total: f64 = values.iter().map(|(_, v)| v).sum();

        values
            .into_iter()
            .map(|(id, v)| Share {
                entity_id: id.clone(),
                percent: if total > 0.0 { v / total * 100.0 } else { 0.0 },
            })
            .collect()
    }
}

impl FromIterator<(EntityId, MetricKind, Kpi)> for KpiSnapshot {
    fn from_iter<I: IntoIterator<Item = (EntityId, MetricKind, Kpi)>>(iter: I) -> Self {
        let mut kpis: BTreeMap<EntityId, BTreeMap<MetricKind, Kpi>> = BTreeMap::new();
        for (id, metric, kpi) in iter {
            kpis.entry(id).or_default().insert(metric, kpi);
        }
        Self { kpis }
    }
}
