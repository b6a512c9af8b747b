pub mod aggregator;
pub mod api;
pub mod config;
pub mod display;
pub mod metrics_server;
pub mod mock_store;
pub mod observability;
pub mod scheduler;
pub mod sources;
pub mod summary;
pub mod transform;

pub use aggregator::{DashboardState, KpiAggregator};
pub use scheduler::{RefreshHandle, Scheduler};
