//! Shared telemetry data types

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A single typed telemetry field value.
///
/// Telemetry fields arrive as positional ASCII and are parsed into the
/// narrowest sensible type. Accessors return `None` on a type mismatch so
/// callers can distinguish a missing metric from a present-but-zero one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the field. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One successfully decoded telemetry datagram.
///
/// Immutable after creation; superseded by later messages on the same
/// channel in [`TelemetryStore`](crate::telemetry::TelemetryStore).
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMessage {
    /// Channel tag (CORR, MARK, SYNC, ...)
    pub channel: String,
    /// Local receive time, Unix seconds
    pub received_at: f64,
    /// Raw field payload after the channel tag (the part past the first comma)
    pub raw: String,
    /// Channel-specific parsed fields. Empty for unknown channels and for
    /// malformed payloads on known channels.
    pub parsed: HashMap<&'static str, FieldValue>,
}

/// Remote sync detector state, as reported on the SYNC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Searching,
    Tentative,
    Locked,
    Unknown,
}

impl SyncState {
    /// Map a wire label to a state. Unrecognized labels become `Unknown`
    /// rather than an error — the remote may grow new states.
    pub fn from_label(label: &str) -> Self {
        match label {
            "SEARCHING" => Self::Searching,
            "TENTATIVE" => Self::Tentative,
            "LOCKED" => Self::Locked,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Searching => "SEARCHING",
            Self::Tentative => "TENTATIVE",
            Self::Locked => "LOCKED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// One minute-marker detection event, extracted from a MARK message.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerEvent {
    /// Local receive time, Unix seconds
    pub observed_at: f64,
    /// Measured pulse duration (nominal ~800 ms)
    pub duration_ms: f64,
    /// Envelope energy at the pulse peak
    pub peak_energy: f64,
    /// Seconds since the previous marker as reported by the remote detector
    pub since_last_sec: f64,
    /// Remote confidence label (HIGH/LOW/...)
    pub confidence: String,
}

/// One sync detector state sample, extracted from a SYNC message.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSample {
    /// Local receive time, Unix seconds
    pub observed_at: f64,
    pub state: SyncState,
    /// Remote confidence in [0, 1]
    pub confidence: f64,
}

/// Current Unix time as fractional seconds.
pub fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
