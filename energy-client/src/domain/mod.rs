mod entity;
mod kpi;
mod reading;
mod view;

pub use entity::{Entity, EntityId, EntityKind};
pub use kpi::{Baselines, Kpi, KpiSnapshot, Share};
pub use reading::{MetricKind, Reading, ReadingBatch, UnknownMetric};
pub use view::{SelectedView, ViewError};
