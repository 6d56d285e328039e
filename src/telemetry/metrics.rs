//! Metric aggregation over telemetry state
//!
//! Pure, read-only condensation of the store's buffers into the scalar
//! metrics the optimization driver scores against. No side effects — the
//! driver decides when buffers are cleared.

use crate::telemetry::TelemetryStore;
use crate::types::{FieldValue, SyncState};
use serde::Serialize;
use std::collections::HashMap;

/// Expected spacing between minute markers.
const NOMINAL_MARKER_INTERVAL_SEC: f64 = 60.0;

/// Dwell assigned to the final sync sample, whose true end is unknown.
const FINAL_SAMPLE_DWELL_SEC: f64 = 0.1;

/// Marker detection quality over the events buffered since the last clear.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerMetrics {
    pub count: usize,
    /// Mean pulse duration, 0 with no events
    pub avg_duration_ms: f64,
    /// Population variance of pulse durations, 0 with fewer than 2 events
    pub duration_variance: f64,
    /// Mean gap between consecutive events, 0 with fewer than 2 events
    pub avg_interval_sec: f64,
    /// |avg_interval_sec - 60|; maximal penalty of 60 with fewer than 2 events
    pub interval_error_sec: f64,
}

/// Sync detector quality over the samples buffered since the last clear.
#[derive(Debug, Clone, Serialize)]
pub struct SyncMetrics {
    /// Dwell-weighted share of time spent LOCKED, in percent
    pub locked_pct: f64,
    /// Mean reported confidence, 0 with no samples
    pub avg_confidence: f64,
    /// Number of adjacent-sample state transitions
    pub state_changes: usize,
    /// Seconds from the first sample to the first LOCKED sample;
    /// +inf when LOCKED was never observed
    pub time_to_lock: f64,
}

/// Parsed fields of the latest CORR message, or an empty map when no CORR
/// telemetry has been received at all. Callers must treat an empty map as
/// telemetry absence — it is not the same as a zero metric.
pub fn correlation_metrics(store: &TelemetryStore) -> HashMap<&'static str, FieldValue> {
    store.latest("CORR").map(|m| m.parsed).unwrap_or_default()
}

pub fn marker_metrics(store: &TelemetryStore) -> MarkerMetrics {
    marker_metrics_from(&store.marker_events())
}

pub fn sync_metrics(store: &TelemetryStore) -> SyncMetrics {
    sync_metrics_from(&store.sync_states())
}

/// Marker statistics over an explicit event slice.
pub fn marker_metrics_from(events: &[crate::types::MarkerEvent]) -> MarkerMetrics {
    let count = events.len();
    if count == 0 {
        return MarkerMetrics {
            count: 0,
            avg_duration_ms: 0.0,
            duration_variance: 0.0,
            avg_interval_sec: 0.0,
            interval_error_sec: NOMINAL_MARKER_INTERVAL_SEC,
        };
    }

    let n = count as f64;
    let avg_duration_ms = events.iter().map(|e| e.duration_ms).sum::<f64>() / n;
    let duration_variance = if count > 1 {
        events
            .iter()
            .map(|e| (e.duration_ms - avg_duration_ms).powi(2))
            .sum::<f64>()
            / n
    } else {
        0.0
    };

    let intervals: Vec<f64> = events
        .windows(2)
        .map(|w| w[1].observed_at - w[0].observed_at)
        .collect();
    let (avg_interval_sec, interval_error_sec) = if intervals.is_empty() {
        (0.0, NOMINAL_MARKER_INTERVAL_SEC)
    } else {
        let avg = intervals.iter().sum::<f64>() / intervals.len() as f64;
        (avg, (avg - NOMINAL_MARKER_INTERVAL_SEC).abs())
    };

    MarkerMetrics {
        count,
        avg_duration_ms,
        duration_variance,
        avg_interval_sec,
        interval_error_sec,
    }
}

/// Sync statistics over an explicit sample slice.
///
/// Each sample's dwell is the gap to the next sample; the final sample
/// gets a fixed small dwell since its true end is unknown.
pub fn sync_metrics_from(samples: &[crate::types::SyncSample]) -> SyncMetrics {
    if samples.is_empty() {
        return SyncMetrics {
            locked_pct: 0.0,
            avg_confidence: 0.0,
            state_changes: 0,
            time_to_lock: f64::INFINITY,
        };
    }

    let start = samples[0].observed_at;
    let mut locked_time = 0.0;
    let mut total_time = 0.0;
    let mut time_to_lock = f64::INFINITY;

    for (i, s) in samples.iter().enumerate() {
        if s.state == SyncState::Locked && time_to_lock.is_infinite() {
            time_to_lock = s.observed_at - start;
        }

        let dwell = if i + 1 < samples.len() {
            samples[i + 1].observed_at - s.observed_at
        } else {
            FINAL_SAMPLE_DWELL_SEC
        };
        total_time += dwell;
        if s.state == SyncState::Locked {
            locked_time += dwell;
        }
    }

    let locked_pct = if total_time > 0.0 {
        locked_time / total_time * 100.0
    } else {
        0.0
    };
    let avg_confidence =
        samples.iter().map(|s| s.confidence).sum::<f64>() / samples.len() as f64;
    let state_changes = samples
        .windows(2)
        .filter(|w| w[0].state != w[1].state)
        .count();

    SyncMetrics {
        locked_pct,
        avg_confidence,
        state_changes,
        time_to_lock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarkerEvent, SyncSample};

    fn marker(at: f64, duration_ms: f64) -> MarkerEvent {
        MarkerEvent {
            observed_at: at,
            duration_ms,
            peak_energy: 10.0,
            since_last_sec: 60.0,
            confidence: "HIGH".to_string(),
        }
    }

    fn sync(at: f64, state: SyncState, confidence: f64) -> SyncSample {
        SyncSample {
            observed_at: at,
            state,
            confidence,
        }
    }

    #[test]
    fn marker_metrics_empty_buffer_defaults() {
        let m = marker_metrics_from(&[]);
        assert_eq!(m.count, 0);
        assert_eq!(m.avg_duration_ms, 0.0);
        assert_eq!(m.duration_variance, 0.0);
        assert_eq!(m.interval_error_sec, 60.0);
    }

    #[test]
    fn marker_metrics_single_event_has_max_interval_error() {
        let m = marker_metrics_from(&[marker(0.0, 810.0)]);
        assert_eq!(m.count, 1);
        assert_eq!(m.avg_duration_ms, 810.0);
        assert_eq!(m.duration_variance, 0.0);
        assert_eq!(m.avg_interval_sec, 0.0);
        assert_eq!(m.interval_error_sec, 60.0);
    }

    #[test]
    fn marker_metrics_nominal_sequence() {
        let m = marker_metrics_from(&[
            marker(0.0, 790.0),
            marker(60.0, 810.0),
            marker(120.0, 800.0),
        ]);
        assert_eq!(m.count, 3);
        assert!((m.avg_duration_ms - 800.0).abs() < 1e-9);
        // Population variance of [790, 810, 800]: (100 + 100 + 0) / 3
        assert!((m.duration_variance - 200.0 / 3.0).abs() < 1e-9);
        assert!((m.avg_interval_sec - 60.0).abs() < 1e-9);
        assert!(m.interval_error_sec < 1e-9);
    }

    #[test]
    fn marker_metrics_interval_error() {
        let m = marker_metrics_from(&[marker(0.0, 800.0), marker(65.0, 800.0)]);
        assert!((m.avg_interval_sec - 65.0).abs() < 1e-9);
        assert!((m.interval_error_sec - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sync_metrics_empty_buffer_defaults() {
        let m = sync_metrics_from(&[]);
        assert_eq!(m.locked_pct, 0.0);
        assert_eq!(m.avg_confidence, 0.0);
        assert_eq!(m.state_changes, 0);
        assert!(m.time_to_lock.is_infinite());
    }

    #[test]
    fn sync_metrics_dwell_weighted_lock_share() {
        let m = sync_metrics_from(&[
            sync(0.0, SyncState::Searching, 0.1),
            sync(10.0, SyncState::Locked, 0.8),
            sync(40.0, SyncState::Locked, 0.75),
        ]);
        // Dwells: 10 (searching), 30 (locked), 0.1 (locked, final)
        assert!((m.locked_pct - 30.1 / 40.1 * 100.0).abs() < 1e-9);
        assert!((m.locked_pct - 75.0).abs() < 0.1);
        assert_eq!(m.state_changes, 1);
        assert!((m.time_to_lock - 10.0).abs() < 1e-9);
        assert!((m.avg_confidence - 0.55).abs() < 1e-9);
    }

    #[test]
    fn sync_metrics_never_locked() {
        let m = sync_metrics_from(&[
            sync(0.0, SyncState::Searching, 0.1),
            sync(5.0, SyncState::Tentative, 0.3),
            sync(10.0, SyncState::Searching, 0.1),
        ]);
        assert_eq!(m.locked_pct, 0.0);
        assert_eq!(m.state_changes, 2);
        assert!(m.time_to_lock.is_infinite());
    }

    #[test]
    fn correlation_metrics_absence_vs_presence() {
        use crate::telemetry::parser::parse_datagram;

        let store = TelemetryStore::new();
        assert!(correlation_metrics(&store).is_empty());

        store.record(
            parse_datagram(
                "CORR,12:00:01,123,1,Y,5.0,8.0,1000.0,1000.0,0.4,0.9,0.85,1,5,0,0.0",
                1.0,
            )
            .unwrap(),
        );
        let metrics = correlation_metrics(&store);
        assert_eq!(metrics["interval_error_ms"].as_f64(), Some(0.0));
    }
}
