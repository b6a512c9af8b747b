use energy_client::domain::KpiSnapshot;
use serde::Serialize;

use crate::{aggregator::DashboardState, config::TileConfig};

/// One metric tile as the dashboard shows it, e.g. `Gasverbrauch Hiltrup: 30kWh (+25)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tile {
    pub label: String,
    pub value: String,
    pub delta: i64,
}

/// Rounds half to even, the way the dashboard always rounded tile values.
fn round_display(v: f64) -> i64 {
    v.round_ties_even() as i64
}

/// Tiles for `configs`, in order. Entries pointing outside the snapshot are skipped.
pub fn render_tiles(configs: &[TileConfig], snapshot: &KpiSnapshot) -> Vec<Tile> {
    configs
        .iter()
        .filter_map(|tile_cfg| {
            snapshot.get(tile_cfg.entity.as_str(), tile_cfg.metric).map(|kpi| Tile {
                label: tile_cfg.label.clone(),
                value: format!("{}kWh", round_display(kpi.current_value)),
                delta: round_display(kpi.baseline_delta),
            })
        })
        .collect()
}

/// Receives every state the scheduler publishes.
pub trait SnapshotDisplay: Send + Sync {
    fn show(&self, state: &DashboardState);
}

/// Writes the tiles of each tick to the log.
pub struct LogDisplay {
    tiles: Vec<TileConfig>,
}

impl LogDisplay {
    pub fn new(tiles: Vec<TileConfig>) -> Self {
        Self { tiles }
    }
}

impl SnapshotDisplay for LogDisplay {
    fn show(&self, state: &DashboardState) {
        if state.is_stale() {
            tracing::warn!(
                tick = state.tick,
                stale_ticks = state.stale_ticks,
                error = state.last_error.as_deref().unwrap_or_default(),
                "showing stale data"
            );
        }
        for tile in render_tiles(&self.tiles, &state.snapshot) {
            tracing::info!(tick = state.tick, label = %tile.label, value = %tile.value, delta = tile.delta, "tile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::domain::{EntityId, Kpi, MetricKind};

    fn tile(entity: &str, metric: MetricKind, label: &str) -> TileConfig {
        TileConfig {
            entity: entity.into(),
            metric,
            label: label.to_string(),
        }
    }

    #[test]
    fn tiles_round_half_to_even_and_keep_order() {
        let snapshot: KpiSnapshot = [
            (EntityId::from("hiltrup"), MetricKind::Power, Kpi::from_value(12.5, 10.0)),
            (EntityId::from("prefab"), MetricKind::Gas, Kpi::from_value(3.5, 5.0)),
        ]
        .into_iter()
        .collect();
        let configs = [
            tile("prefab", MetricKind::Gas, "Gasverbrauch Pre-Fab"),
            tile("hiltrup", MetricKind::Power, "Stromverbrauch Hiltrup"),
            tile("fab", MetricKind::Power, "Stromverbrauch Fab"),
        ];

        let tiles = render_tiles(&configs, &snapshot);

        assert_eq!(
            tiles,
            [
                Tile {
                    label: "Gasverbrauch Pre-Fab".to_string(),
                    value: "4kWh".to_string(),
                    delta: -2,
                },
                Tile {
                    label: "Stromverbrauch Hiltrup".to_string(),
                    value: "12kWh".to_string(),
                    delta: 2,
                },
            ]
        );
    }

    #[test]
    fn small_negative_delta_rounds_to_zero() {
        let snapshot: KpiSnapshot = [(EntityId::from("fab"), MetricKind::Gas, Kpi::from_value(4.7, 5.0))]
            .into_iter()
            .collect();

        let tiles = render_tiles(&[tile("fab", MetricKind::Gas, "Gas Fab")], &snapshot);
        assert_eq!(tiles[0].value, "5kWh");
        assert_eq!(tiles[0].delta, 0);
    }
}
