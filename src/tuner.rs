//! Optimization driver
//!
//! Runs one minimization at a time against the live pipeline: push a
//! candidate parameter vector, let the remote settle, condense telemetry
//! into a score, feed it back to the minimizer. Every strict improvement
//! is persisted immediately so an interrupted run never loses its best
//! configuration.
//!
//! Known limitation, kept deliberately: correlation-mode scoring reads the
//! *latest* CORR message at evaluation time. If the remote emits
//! infrequently, that message can predate the settle window and reflect
//! the previous evaluation's parameters. Telemetry from the current
//! evaluation is never raced — sends complete before the settle sleep
//! begins — but staleness across evaluations is accepted.

use crate::config::TimingConfig;
use crate::control::params::TuneMode;
use crate::control::PipelineLink;
use crate::minimize::{self, Method, Status};
use crate::results::ParamStore;
use crate::telemetry::metrics::{
    correlation_metrics, marker_metrics, sync_metrics_from, MarkerMetrics, SyncMetrics,
};
use crate::telemetry::TelemetryStore;
use crate::types::FieldValue;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Fixed score for an evaluation window that produced no telemetry at
/// all. Must dominate any score computed from real samples.
pub const NO_TELEMETRY_PENALTY: f64 = 1000.0;

/// Nominal marker pulse duration.
const NOMINAL_MARKER_DURATION_MS: f64 = 800.0;

/// Seconds between sync-collection progress reports.
const SYNC_PROGRESS_EVERY_SECS: u64 = 15;

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Converged,
    MaxEvalsReached,
    Aborted,
}

/// Result of one `optimize()` run.
#[derive(Debug, Clone, Serialize)]
pub struct TuneOutcome {
    pub mode: TuneMode,
    pub success: bool,
    pub status: RunStatus,
    pub best_params: Vec<f64>,
    pub param_names: Vec<&'static str>,
    /// +inf when no evaluation produced telemetry
    pub best_score: f64,
    pub eval_count: u64,
}

/// Best-seen state for the run in progress. Mutated only by the objective
/// function executing inside that run.
struct RunStats {
    eval_count: u64,
    best_score: f64,
    best_params: Vec<f64>,
}

/// The closed-loop tuning driver. One instance owns the control link and
/// result store; `optimize` takes `&mut self`, so only one run can be
/// active at a time.
pub struct Tuner {
    store: Arc<TelemetryStore>,
    pipeline: PipelineLink,
    results: ParamStore,
    timing: TimingConfig,
    stop: Arc<AtomicBool>,
}

impl Tuner {
    pub fn new(
        store: Arc<TelemetryStore>,
        pipeline: PipelineLink,
        results: ParamStore,
        timing: TimingConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            results,
            timing,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag. Setting it aborts the run within one poll
    /// interval; the best result so far is already on disk.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Run one optimization. Seeds at bound midpoints when no initial
    /// vector is given; on completion (converged, budget exhausted, or
    /// aborted) the best parameters found are pushed back to the remote.
    pub fn optimize(
        &mut self,
        mode: TuneMode,
        initial: Option<Vec<f64>>,
        method: Method,
        max_evals: usize,
    ) -> TuneOutcome {
        let specs = mode.specs();
        let seed = match initial {
            Some(v) if v.len() == specs.len() => v,
            Some(v) => {
                warn!(
                    mode = %mode,
                    expected = specs.len(),
                    got = v.len(),
                    "Initial vector length mismatch — seeding at bound midpoints"
                );
                specs.iter().map(|s| s.midpoint()).collect()
            }
            None => specs.iter().map(|s| s.midpoint()).collect(),
        };

        // Make sure the channel this mode scores against is streaming.
        self.pipeline.enable_telemetry(mode.telemetry_channel());

        info!(
            mode = %mode,
            method = %method,
            max_evals,
            params = ?mode.param_names(),
            seed = ?seed,
            "Starting optimization"
        );

        let mut stats = RunStats {
            eval_count: 0,
            best_score: f64::INFINITY,
            best_params: seed.clone(),
        };

        let opts = minimize::Options {
            max_evals,
            stop: Some(Arc::clone(&self.stop)),
            ..minimize::Options::default()
        };
        let bounds = mode.bounds();
        let bounds_arg = match method {
            Method::NelderMead => None,
            Method::BoundedBfgs => Some(bounds.as_slice()),
        };

        let this: &Self = self;
        let outcome = {
            let mut objective = |x: &[f64]| this.evaluate(mode, x, &mut stats);
            minimize::minimize(&mut objective, &seed, bounds_arg, method, &opts)
        };

        let status = match outcome.status {
            Status::Converged => RunStatus::Converged,
            Status::MaxEvals => RunStatus::MaxEvalsReached,
            Status::Stopped => RunStatus::Aborted,
        };

        // Leave the remote running the best configuration found.
        if stats.best_score.is_finite() {
            self.pipeline.set_vector(&stats.best_params, mode);
        }

        info!(
            mode = %mode,
            status = ?status,
            best_score = stats.best_score,
            evaluations = stats.eval_count,
            best_params = ?stats.best_params,
            "Optimization complete"
        );

        TuneOutcome {
            mode,
            success: status != RunStatus::Aborted,
            status,
            best_params: stats.best_params,
            param_names: mode.param_names(),
            best_score: stats.best_score,
            eval_count: stats.eval_count,
        }
    }

    /// Objective dispatch.
    fn evaluate(&self, mode: TuneMode, x: &[f64], stats: &mut RunStats) -> f64 {
        match mode {
            TuneMode::Marker => self.marker_objective(mode, x, stats),
            TuneMode::Sync => self.sync_objective(mode, x, stats),
            TuneMode::Tick | TuneMode::Corr | TuneMode::All => {
                self.correlation_objective(mode, x, stats)
            }
        }
    }

    /// tick/corr/all: settle, then score the latest correlator report.
    fn correlation_objective(&self, mode: TuneMode, x: &[f64], stats: &mut RunStats) -> f64 {
        stats.eval_count += 1;
        let sent = self.pipeline.set_vector(x, mode);

        self.wait_for(secs(self.timing.settle_secs));

        let metrics = correlation_metrics(&self.store);
        if metrics.is_empty() {
            debug!(eval = stats.eval_count, "No correlation telemetry — penalty");
            return NO_TELEMETRY_PENALTY;
        }

        let score = correlation_score(&metrics);
        debug!(eval = stats.eval_count, score, "Correlation evaluation");
        self.track_best(mode, x, score, sent, stats);
        score
    }

    /// marker: collect pulses at 1 Hz until the target count or timeout.
    fn marker_objective(&self, mode: TuneMode, x: &[f64], stats: &mut RunStats) -> f64 {
        stats.eval_count += 1;
        let sent = self.pipeline.set_vector(x, mode);

        self.store.clear_marker_events();
        info!(
            eval = stats.eval_count,
            target = self.timing.marker_target,
            window_secs = self.timing.marker_window_secs,
            "Waiting for markers"
        );

        let started = Instant::now();
        let mut last_count = 0;
        let elapsed = loop {
            let elapsed = started.elapsed().as_secs_f64();
            let count = self.store.marker_count();
            if count > last_count {
                info!(count, target = self.timing.marker_target, elapsed_secs = %format!("{elapsed:.0}"), "Marker detected");
                last_count = count;
            }
            if count >= self.timing.marker_target {
                break elapsed;
            }
            if elapsed >= self.timing.marker_window_secs {
                info!(count, elapsed_secs = %format!("{elapsed:.0}"), "Marker window timed out");
                break elapsed;
            }
            if !self.wait_for(poll_slice(&self.timing)) {
                break started.elapsed().as_secs_f64();
            }
        };

        let metrics = marker_metrics(&self.store);
        if metrics.count == 0 {
            debug!(eval = stats.eval_count, "No markers detected — penalty");
            return NO_TELEMETRY_PENALTY;
        }

        let score = marker_score(&metrics, elapsed);
        debug!(
            eval = stats.eval_count,
            count = metrics.count,
            score,
            "Marker evaluation"
        );
        self.track_best(mode, x, score, sent, stats);
        score
    }

    /// sync: collect state samples for a fixed window. Mid-window metric
    /// reads are progress reporting only — nothing decides on them.
    fn sync_objective(&self, mode: TuneMode, x: &[f64], stats: &mut RunStats) -> f64 {
        stats.eval_count += 1;
        let sent = self.pipeline.set_vector(x, mode);

        self.store.clear_sync_states();
        info!(
            eval = stats.eval_count,
            window_secs = self.timing.sync_window_secs,
            "Collecting sync state"
        );

        let started = Instant::now();
        let mut reported = 0u64;
        while started.elapsed().as_secs_f64() < self.timing.sync_window_secs {
            if !self.wait_for(poll_slice(&self.timing)) {
                break;
            }
            let elapsed = started.elapsed().as_secs();
            if elapsed / SYNC_PROGRESS_EVERY_SECS > reported {
                reported = elapsed / SYNC_PROGRESS_EVERY_SECS;
                let m = sync_metrics_from(&self.store.sync_states());
                info!(
                    elapsed_secs = elapsed,
                    locked_pct = %format!("{:.1}", m.locked_pct),
                    "Sync collection progress"
                );
            }
        }

        let samples = self.store.sync_states();
        if samples.is_empty() {
            debug!(eval = stats.eval_count, "No sync telemetry — penalty");
            return NO_TELEMETRY_PENALTY;
        }

        let metrics = sync_metrics_from(&samples);
        let score = sync_score(&metrics);
        debug!(
            eval = stats.eval_count,
            locked_pct = metrics.locked_pct,
            state_changes = metrics.state_changes,
            score,
            "Sync evaluation"
        );
        self.track_best(mode, x, score, sent, stats);
        score
    }

    /// Update and persist the run's best. A failed parameter push makes
    /// the evaluation a definite non-improvement — the score cannot be
    /// attributed to the candidate vector.
    fn track_best(&self, mode: TuneMode, x: &[f64], score: f64, sent: bool, stats: &mut RunStats) {
        if !sent {
            debug!(
                eval = stats.eval_count,
                "Parameter push incomplete — evaluation not eligible as best"
            );
            return;
        }
        if score < stats.best_score {
            stats.best_score = score;
            stats.best_params = x.to_vec();
            info!(
                eval = stats.eval_count,
                score,
                params = ?x,
                "New best"
            );
            // Persist immediately so an interruption keeps this result.
            if let Err(e) = self.results.record_result(&stats.best_params, mode, score) {
                error!(error = %e, "Failed to persist best result — tuning progress at risk");
            }
        }
    }

    /// Sleep for `duration` in poll-interval slices, returning false as
    /// soon as a stop is requested.
    fn wait_for(&self, duration: Duration) -> bool {
        let poll = poll_slice(&self.timing);
        let deadline = Instant::now() + duration;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(poll));
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn poll_slice(timing: &TimingConfig) -> Duration {
    Duration::from_millis(timing.poll_interval_ms.max(1))
}

// ============================================================================
// Score functions
// ============================================================================

/// Correlation-mode score over the latest CORR report's parsed fields.
/// Lower is better: timing error dominates, drift is damped, a long tick
/// chain earns a capped bonus, a weak matched-filter response is
/// penalized.
pub fn correlation_score(metrics: &HashMap<&'static str, FieldValue>) -> f64 {
    let get = |key: &str, default: f64| {
        metrics.get(key).and_then(FieldValue::as_f64).unwrap_or(default)
    };

    let interval_error = get("interval_error_ms", 1000.0);
    let drift = get("cumulative_drift_ms", 0.0).abs();
    let chain_length = get("chain_length", 0.0);
    let corr_ratio = get("corr_ratio", 0.0);

    let chain_bonus = (chain_length * 0.1).min(5.0);
    let corr_penalty = ((1.0 - corr_ratio) * 2.0).max(0.0);

    interval_error + drift * 0.1 - chain_bonus + corr_penalty
}

/// Marker-mode score: missed detections cost 100 points each, plus scaled
/// interval error, duration variance, and deviation from the nominal
/// 800 ms pulse.
pub fn marker_score(metrics: &MarkerMetrics, elapsed_secs: f64) -> f64 {
    let expected = (elapsed_secs / 60.0).floor() + 1.0;
    let detection_penalty = (expected - metrics.count as f64) * 100.0;
    let interval_error = metrics.interval_error_sec * 10.0;
    let duration_var = metrics.duration_variance / 100.0;
    let duration_error = (metrics.avg_duration_ms - NOMINAL_MARKER_DURATION_MS).abs() / 10.0;

    detection_penalty + interval_error + duration_var + duration_error
}

/// Sync-mode score: maximize locked share, penalize each state transition
/// by 2 points, penalize slow lock acquisition (capped), reward reported
/// confidence.
pub fn sync_score(metrics: &SyncMetrics) -> f64 {
    (100.0 - metrics.locked_pct)
        + 2.0 * metrics.state_changes as f64
        + metrics.time_to_lock.min(60.0) / 6.0
        - 5.0 * metrics.avg_confidence
}
