//! wwv-tuner: closed-loop parameter tuning for a WWV decoding pipeline
//!
//! Drives a black-box minimizer against live telemetry from an external
//! tick/marker/sync detector: push candidate parameters over UDP, wait for
//! the remote to settle, condense its telemetry into a score, repeat, and
//! persist the best configuration found.
//!
//! ## Architecture
//!
//! - **Telemetry**: UDP listener, per-channel parsers, shared lock-guarded
//!   store, and pure metric aggregation
//! - **Control**: fire-and-forget parameter link to the pipeline plus a
//!   synchronous SDR front-end client
//! - **Minimize**: derivative-free simplex and bounded quasi-Newton methods
//! - **Tuner**: the optimization driver tying the loop together
//! - **Results**: section-based last-run / all-time-best result files

pub mod config;
pub mod control;
pub mod minimize;
pub mod results;
pub mod telemetry;
pub mod tuner;
pub mod types;

// Re-export the tuning surface
pub use config::TunerConfig;
pub use control::{ParamSpec, PipelineLink, SdrLink, SdrResponse, TuneMode};
pub use minimize::Method;
pub use results::ParamStore;
pub use telemetry::{TelemetryListener, TelemetryStore};
pub use tuner::{RunStatus, TuneOutcome, Tuner};

// Re-export commonly used types
pub use types::{FieldValue, MarkerEvent, SyncSample, SyncState, TelemetryMessage};
