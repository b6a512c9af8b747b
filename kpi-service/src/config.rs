use std::{collections::HashSet, fs, path::PathBuf, time::Duration};

use energy_client::domain::{Baselines, Entity, EntityId, MetricKind};
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where each tick starts reading from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchWindow {
    /// From the previous successful tick; the lookback window on cold start.
    #[default]
    SinceLastTick,
    /// Always the lookback window ending now.
    Rolling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
    #[serde(default)]
    pub fetch_window: FetchWindow,
    /// Window starts are rounded down to a multiple of this; 0 disables rounding.
    #[serde(default = "default_window_granularity_secs")]
    pub window_granularity_secs: u64,
}

/// Upper bound for `lookback_secs` and `window_granularity_secs` (ten years).
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_interval_secs() -> u64 {
    300
}

fn default_lookback_secs() -> u64 {
    24 * 60 * 60
}

fn default_window_granularity_secs() -> u64 {
    60 * 60
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lookback_secs: default_lookback_secs(),
            fetch_window: FetchWindow::default(),
            window_granularity_secs: default_window_granularity_secs(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Only meaningful after [`AppConfig::validate`] bounded the value.
    pub fn lookback(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.lookback_secs).unwrap_or(i64::MAX))
    }

    pub fn window_granularity(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.window_granularity_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TileConfig {
    pub entity: EntityId,
    pub metric: MetricKind,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmardChannel {
    pub entity: EntityId,
    pub metric: MetricKind,
    /// SMARD filter id of the series, e.g. 410 for total load.
    pub filter: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmardConfig {
    #[serde(default = "default_smard_base_url")]
    pub base_url: String,
    #[serde(default = "default_smard_region")]
    pub region: String,
    #[serde(default = "default_smard_resolution")]
    pub resolution: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    pub channels: Vec<SmardChannel>,
}

fn default_smard_base_url() -> String {
    "https://www.smard.de/app/chart_data".to_string()
}

fn default_smard_region() -> String {
    "DE".to_string()
}

fn default_smard_resolution() -> String {
    "hour".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvColumn {
    /// Zero-based column position.
    pub index: usize,
    pub entity: EntityId,
    pub metric: MetricKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    pub path: PathBuf,
    /// Rows preceding the header row.
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Column holding an RFC 3339 timestamp; rows are stamped with the file's
    /// modification time when absent.
    #[serde(default)]
    pub timestamp_column: Option<usize>,
    pub columns: Vec<CsvColumn>,
}

fn default_skip_rows() -> usize {
    2
}

fn default_has_header() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockRestConfig {
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomChannel {
    pub entity: EntityId,
    pub metric: MetricKind,
    pub base: f64,
    #[serde(default)]
    pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomConfig {
    #[serde(default)]
    pub seed: Option<u64>,
    pub channels: Vec<RandomChannel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Smard(SmardConfig),
    Csv(CsvConfig),
    MockRest(MockRestConfig),
    Random(RandomConfig),
}

impl SourceConfig {
    /// `(entity, metric)` pairs the backend is configured to deliver.
    fn channels(&self) -> Vec<(&EntityId, MetricKind)> {
        match self {
            SourceConfig::Smard(c) => c.channels.iter().map(|ch| (&ch.entity, ch.metric)).collect(),
            SourceConfig::Csv(c) => c.columns.iter().map(|col| (&col.entity, col.metric)).collect(),
            SourceConfig::MockRest(_) => Vec::new(),
            SourceConfig::Random(c) => c.channels.iter().map(|ch| (&ch.entity, ch.metric)).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_energy_kwh")]
    pub energy_kwh: f64,
    #[serde(default = "default_co2_kg")]
    pub co2_kg: f64,
    #[serde(default = "default_cost_eur")]
    pub cost_eur: f64,
    /// Uniform noise as a fraction of each base value.
    #[serde(default = "default_ratio")]
    pub jitter_ratio: f64,
    /// Reported delta as a fraction of each value.
    #[serde(default = "default_ratio")]
    pub delta_ratio: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_energy_kwh() -> f64 {
    1000.0
}

fn default_co2_kg() -> f64 {
    500.0
}

fn default_cost_eur() -> f64 {
    2000.0
}

fn default_ratio() -> f64 {
    0.1
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            energy_kwh: default_energy_kwh(),
            co2_kg: default_co2_kg(),
            cost_eur: default_cost_eur(),
            jitter_ratio: default_ratio(),
            delta_ratio: default_ratio(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub baselines: Baselines,
    #[serde(default)]
    pub cache: CacheConfig,
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub tiles: Vec<TileConfig>,
    pub source: SourceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        use std::env;

        let path = env::var("KPI_SERVICE_CONFIG").unwrap_or_else(|_| "kpi-service.toml".to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        if cfg.tiles.is_empty() {
            cfg.tiles = cfg.default_tiles();
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entities.is_empty() {
            return Err(ConfigError::Invalid("at least one entity is required".to_string()));
        }
        if self.refresh.interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh.interval_secs must be positive".to_string()));
        }
        if self.refresh.lookback_secs == 0 || self.refresh.lookback_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "refresh.lookback_secs must be between 1 and {MAX_WINDOW_SECS}"
            )));
        }
        if self.refresh.window_granularity_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "refresh.window_granularity_secs must be at most {MAX_WINDOW_SECS}"
            )));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be positive".to_string()));
        }

        let mut ids = HashSet::new();
        for entity in &self.entities {
            if entity.id.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid("entity id must not be empty".to_string()));
            }
            if !ids.insert(entity.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate entity id '{}'", entity.id)));
            }
            let mut scales = std::iter::once(entity.scale).chain(entity.metric_scale.values().copied());
            if scales.any(|s| !(s.is_finite() && s > 0.0)) {
                return Err(ConfigError::Invalid(format!(
                    "entity '{}' must have positive scale factors",
                    entity.id
                )));
            }
        }

        for (entity, metric) in self.source.channels() {
            if !ids.contains(entity.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "source channel '{entity}/{metric}' references an unknown entity"
                )));
            }
        }
        for tile in &self.tiles {
            if !ids.contains(tile.entity.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "tile '{}' references unknown entity '{}'",
                    tile.label, tile.entity
                )));
            }
        }

        Ok(())
    }

    /// One tile per configured channel, or per entity and metric when the
    /// backend does not declare channels.
    fn default_tiles(&self) -> Vec<TileConfig> {
        let channels = self.source.channels();
        let pairs: Vec<(EntityId, MetricKind)> = if channels.is_empty() {
            self.entities
                .iter()
                .flat_map(|e| MetricKind::ALL.into_iter().map(move |m| (e.id.clone(), m)))
                .collect()
        } else {
            channels.into_iter().map(|(e, m)| (e.clone(), m)).collect()
        };

        pairs
            .into_iter()
            .map(|(entity, metric)| {
                let name = self
                    .entities
                    .iter()
                    .find(|e| e.id == entity)
                    .map(|e| e.name.as_str())
                    .unwrap_or(entity.as_str());
                TileConfig {
                    label: format!("{name} {metric}"),
                    entity,
                    metric,
                }
            })
            .collect()
    }
}
