//! Telemetry ingestion and aggregation
//!
//! Receives channel-tagged UDP datagrams from the remote decoding
//! pipeline, keeps the latest message per channel plus bounded event
//! history, and condenses them into per-mode quality metrics.

pub mod listener;
pub mod metrics;
pub mod parser;
pub mod store;

pub use listener::{TelemetryError, TelemetryListener};
pub use metrics::{
    correlation_metrics, marker_metrics, sync_metrics, MarkerMetrics, SyncMetrics,
};
pub use store::TelemetryStore;
