//! Tuner configuration — endpoints, timing windows, and result paths
//!
//! Every operational knob is a TOML field with a built-in default, so the
//! binary runs with no config file at all. Loading order:
//!
//! 1. `$WWV_TUNER_CONFIG` environment variable (path to a TOML file)
//! 2. `./wwv_tuner.toml` in the current working directory
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Root tuner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Telemetry inbound endpoint
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Pipeline parameter-control endpoint
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// SDR front-end control endpoint
    #[serde(default)]
    pub sdr: SdrConfig,

    /// Evaluation timing windows
    #[serde(default)]
    pub timing: TimingConfig,

    /// Result file locations
    #[serde(default)]
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// UDP bind address for inbound telemetry
    #[serde(default = "default_telemetry_bind")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// UDP target for `SET_*` / `ENABLE_TELEM` commands
    #[serde(default = "default_pipeline_addr")]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdrConfig {
    /// TCP address of the SDR server control port
    #[serde(default = "default_sdr_addr")]
    pub addr: String,
}

/// Timing for evaluation windows. These are polling policies, not
/// accidents: the driver sleeps in `poll_interval_ms` slices so a stop
/// request is observed within one slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Settle time after a parameter push before reading CORR metrics
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,

    /// Markers to wait for in a marker-mode evaluation
    #[serde(default = "default_marker_target")]
    pub marker_target: usize,

    /// Timeout for a marker-mode evaluation window
    #[serde(default = "default_marker_window_secs")]
    pub marker_window_secs: f64,

    /// Sync-mode collection window
    #[serde(default = "default_sync_window_secs")]
    pub sync_window_secs: f64,

    /// Poll slice for cancellable waits
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// All-time-best parameter file
    #[serde(default = "default_best_path")]
    pub best_path: String,

    /// Last-run parameter file
    #[serde(default = "default_last_run_path")]
    pub last_run_path: String,
}

fn default_telemetry_bind() -> String {
    "0.0.0.0:3005".to_string()
}

fn default_pipeline_addr() -> String {
    "127.0.0.1:3006".to_string()
}

fn default_sdr_addr() -> String {
    "127.0.0.1:4535".to_string()
}

fn default_settle_secs() -> f64 {
    2.0
}

fn default_marker_target() -> usize {
    3
}

fn default_marker_window_secs() -> f64 {
    180.0
}

fn default_sync_window_secs() -> f64 {
    60.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_best_path() -> String {
    "optimized_params.ini".to_string()
}

fn default_last_run_path() -> String {
    "last_run.ini".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_telemetry_bind(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            addr: default_pipeline_addr(),
        }
    }
}

impl Default for SdrConfig {
    fn default() -> Self {
        Self {
            addr: default_sdr_addr(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            marker_target: default_marker_target(),
            marker_window_secs: default_marker_window_secs(),
            sync_window_secs: default_sync_window_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            best_path: default_best_path(),
            last_run_path: default_last_run_path(),
        }
    }
}

impl TunerConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("WWV_TUNER_CONFIG") {
            let p = PathBuf::from(&path);
            match Self::load_from_file(&p) {
                Ok(config) => {
                    info!(path = %p.display(), "Loaded tuner config from WWV_TUNER_CONFIG");
                    return config;
                }
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Failed to load config from WWV_TUNER_CONFIG, falling back");
                }
            }
        }

        let local = Path::new("wwv_tuner.toml");
        if local.exists() {
            match Self::load_from_file(local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded tuner config");
                    return config;
                }
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "Failed to load local config, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Sanity-check timing values. Returns warnings; a questionable config
    /// is logged, not fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let t = &self.timing;

        if t.settle_secs <= 0.0 {
            warnings.push(format!(
                "timing.settle_secs = {} — the pipeline gets no time to react to parameter changes",
                t.settle_secs
            ));
        }
        if t.marker_target == 0 {
            warnings.push("timing.marker_target = 0 — marker evaluations would score immediately".to_string());
        }
        if t.marker_window_secs < 60.0 {
            warnings.push(format!(
                "timing.marker_window_secs = {} — markers arrive once a minute, window is unlikely to fill",
                t.marker_window_secs
            ));
        }
        if t.sync_window_secs <= 0.0 {
            warnings.push(format!(
                "timing.sync_window_secs = {} — sync evaluations need a collection window",
                t.sync_window_secs
            ));
        }
        if t.poll_interval_ms == 0 {
            warnings.push("timing.poll_interval_ms = 0 — busy-wait".to_string());
        }
        warnings
    }
}
