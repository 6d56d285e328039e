//! Tunable parameter families and bounds
//!
//! The remote pipeline exposes 22 tunable parameters across four detector
//! families. Each family is a closed, ordered list: the optimization
//! driver works with positional vectors, so ordering here is part of the
//! wire contract. Bounds are static configuration and never change at
//! runtime.

use serde::Serialize;
use std::fmt;

/// Which parameter family (or all of them) an optimization run tunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TuneMode {
    /// Tick detector (threshold, adaptation rates, min duration)
    Tick,
    /// Tick correlator (epoch confidence, max misses)
    Corr,
    /// Minute-marker detector
    Marker,
    /// Sync detector (weights, thresholds, decay rates, tolerances)
    Sync,
    /// All four families concatenated in family order
    All,
}

impl TuneMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Corr => "corr",
            Self::Marker => "marker",
            Self::Sync => "sync",
            Self::All => "all",
        }
    }

    /// Parameter families tuned by this mode, in order.
    pub fn families(self) -> &'static [&'static ParamFamily] {
        static TICK: [&ParamFamily; 1] = [&TICK_DETECTOR];
        static CORR: [&ParamFamily; 1] = [&TICK_CORRELATOR];
        static MARKER: [&ParamFamily; 1] = [&MARKER_DETECTOR];
        static SYNC: [&ParamFamily; 1] = [&SYNC_DETECTOR];
        static ALL: [&ParamFamily; 4] = [
            &TICK_DETECTOR,
            &TICK_CORRELATOR,
            &MARKER_DETECTOR,
            &SYNC_DETECTOR,
        ];
        match self {
            Self::Tick => &TICK,
            Self::Corr => &CORR,
            Self::Marker => &MARKER,
            Self::Sync => &SYNC,
            Self::All => &ALL,
        }
    }

    /// Ordered parameter specs for this mode.
    pub fn specs(self) -> Vec<&'static ParamSpec> {
        self.families()
            .iter()
            .flat_map(|f| f.specs.iter())
            .collect()
    }

    /// Ordered `[min, max]` bounds for this mode's parameters.
    pub fn bounds(self) -> Vec<(f64, f64)> {
        self.specs().iter().map(|s| (s.min, s.max)).collect()
    }

    /// Ordered parameter names for this mode.
    pub fn param_names(self) -> Vec<&'static str> {
        self.specs().iter().map(|s| s.name).collect()
    }

    /// Telemetry channel this mode's objective scores against.
    pub fn telemetry_channel(self) -> &'static str {
        match self {
            Self::Tick | Self::Corr | Self::All => "CORR",
            Self::Marker => "MARK",
            Self::Sync => "SYNC",
        }
    }
}

impl fmt::Display for TuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rendering rule for a parameter value, on the wire and in result files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// Floating parameter, 6 decimal places in result files
    Float6,
    /// Millisecond duration, 2 decimal places in result files
    Millis2,
    /// Integer parameter, rounded before sending
    Integer,
}

/// One tunable remote parameter.
#[derive(Debug)]
pub struct ParamSpec {
    /// Short name used in vectors and logs
    pub name: &'static str,
    /// Wire command (`SET_<NAME> <value>`)
    pub command: &'static str,
    /// Key within the family's result-file section
    pub ini_key: &'static str,
    pub min: f64,
    pub max: f64,
    pub format: ValueFormat,
}

impl ParamSpec {
    /// Midpoint of the bound — the default optimization seed.
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Value as sent on the wire.
    pub fn wire_value(&self, value: f64) -> String {
        match self.format {
            ValueFormat::Integer => format!("{}", value.round() as i64),
            ValueFormat::Float6 | ValueFormat::Millis2 => format!("{value}"),
        }
    }

    /// Value as written to result files.
    pub fn file_value(&self, value: f64) -> String {
        match self.format {
            ValueFormat::Float6 => format!("{value:.6}"),
            ValueFormat::Millis2 => format!("{value:.2}"),
            ValueFormat::Integer => format!("{}", value.round() as i64),
        }
    }
}

/// A detector family: its result-file section plus its ordered parameters.
#[derive(Debug)]
pub struct ParamFamily {
    /// Section name in the persisted result files
    pub section: &'static str,
    pub specs: &'static [ParamSpec],
}

pub static TICK_DETECTOR: ParamFamily = ParamFamily {
    section: "tick_detector",
    specs: &[
        ParamSpec {
            name: "threshold",
            command: "SET_TICK_THRESHOLD",
            ini_key: "threshold_multiplier",
            min: 1.0,
            max: 5.0,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "adapt_down",
            command: "SET_TICK_ADAPT_DOWN",
            ini_key: "adapt_alpha_down",
            min: 0.9,
            max: 0.999,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "adapt_up",
            command: "SET_TICK_ADAPT_UP",
            ini_key: "adapt_alpha_up",
            min: 0.001,
            max: 0.1,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "min_duration",
            command: "SET_TICK_MIN_DURATION",
            ini_key: "min_duration_ms",
            min: 1.0,
            max: 10.0,
            format: ValueFormat::Millis2,
        },
    ],
};

pub static TICK_CORRELATOR: ParamFamily = ParamFamily {
    section: "tick_correlator",
    specs: &[
        ParamSpec {
            name: "confidence",
            command: "SET_CORR_CONFIDENCE",
            ini_key: "epoch_confidence_threshold",
            min: 0.5,
            max: 0.95,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "max_misses",
            command: "SET_CORR_MAX_MISSES",
            ini_key: "max_consecutive_misses",
            min: 2.0,
            max: 10.0,
            format: ValueFormat::Integer,
        },
    ],
};

pub static MARKER_DETECTOR: ParamFamily = ParamFamily {
    section: "marker_detector",
    specs: &[
        ParamSpec {
            name: "marker_threshold",
            command: "SET_MARKER_THRESHOLD",
            ini_key: "threshold_multiplier",
            min: 2.0,
            max: 5.0,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "marker_adapt_rate",
            command: "SET_MARKER_ADAPT_RATE",
            ini_key: "noise_adapt_rate",
            min: 0.0001,
            max: 0.01,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "marker_min_duration",
            command: "SET_MARKER_MIN_DURATION",
            ini_key: "min_duration_ms",
            min: 300.0,
            max: 700.0,
            format: ValueFormat::Millis2,
        },
    ],
};

pub static SYNC_DETECTOR: ParamFamily = ParamFamily {
    section: "sync_detector",
    specs: &[
        // Evidence weights
        ParamSpec {
            name: "sync_weight_tick",
            command: "SET_SYNC_WEIGHT_TICK",
            ini_key: "weight_tick",
            min: 0.01,
            max: 0.2,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_weight_marker",
            command: "SET_SYNC_WEIGHT_MARKER",
            ini_key: "weight_marker",
            min: 0.1,
            max: 0.6,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_weight_p_marker",
            command: "SET_SYNC_WEIGHT_P_MARKER",
            ini_key: "weight_p_marker",
            min: 0.05,
            max: 0.3,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_weight_tick_hole",
            command: "SET_SYNC_WEIGHT_TICK_HOLE",
            ini_key: "weight_tick_hole",
            min: 0.05,
            max: 0.4,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_weight_combined",
            command: "SET_SYNC_WEIGHT_COMBINED",
            ini_key: "weight_combined_hole_marker",
            min: 0.2,
            max: 0.8,
            format: ValueFormat::Float6,
        },
        // Confidence thresholds
        ParamSpec {
            name: "sync_locked_threshold",
            command: "SET_SYNC_LOCKED_THRESHOLD",
            ini_key: "confidence_locked_threshold",
            min: 0.5,
            max: 0.9,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_min_retain",
            command: "SET_SYNC_MIN_RETAIN",
            ini_key: "confidence_min_retain",
            min: 0.01,
            max: 0.2,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_tentative_init",
            command: "SET_SYNC_TENTATIVE_INIT",
            ini_key: "confidence_tentative_init",
            min: 0.1,
            max: 0.5,
            format: ValueFormat::Float6,
        },
        // Decay rates
        ParamSpec {
            name: "sync_decay_normal",
            command: "SET_SYNC_DECAY_NORMAL",
            ini_key: "confidence_decay_normal",
            min: 0.99,
            max: 0.9999,
            format: ValueFormat::Float6,
        },
        ParamSpec {
            name: "sync_decay_recovering",
            command: "SET_SYNC_DECAY_RECOVERING",
            ini_key: "confidence_decay_recovering",
            min: 0.90,
            max: 0.99,
            format: ValueFormat::Float6,
        },
        // Timing tolerances
        ParamSpec {
            name: "sync_tick_tolerance",
            command: "SET_SYNC_TICK_TOLERANCE",
            ini_key: "tick_phase_tolerance_ms",
            min: 50.0,
            max: 200.0,
            format: ValueFormat::Millis2,
        },
        ParamSpec {
            name: "sync_marker_tolerance",
            command: "SET_SYNC_MARKER_TOLERANCE",
            ini_key: "marker_tolerance_ms",
            min: 200.0,
            max: 800.0,
            format: ValueFormat::Millis2,
        },
        ParamSpec {
            name: "sync_p_marker_tolerance",
            command: "SET_SYNC_P_MARKER_TOLERANCE",
            ini_key: "p_marker_tolerance_ms",
            min: 100.0,
            max: 400.0,
            format: ValueFormat::Millis2,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_sizes_are_closed() {
        assert_eq!(TuneMode::Tick.specs().len(), 4);
        assert_eq!(TuneMode::Corr.specs().len(), 2);
        assert_eq!(TuneMode::Marker.specs().len(), 3);
        assert_eq!(TuneMode::Sync.specs().len(), 13);
        assert_eq!(TuneMode::All.specs().len(), 22);
    }

    #[test]
    fn all_mode_concatenates_in_family_order() {
        let names = TuneMode::All.param_names();
        assert_eq!(names[0], "threshold");
        assert_eq!(names[4], "confidence");
        assert_eq!(names[6], "marker_threshold");
        assert_eq!(names[9], "sync_weight_tick");
        assert_eq!(names[21], "sync_p_marker_tolerance");
    }

    #[test]
    fn bounds_match_spec_order() {
        let bounds = TuneMode::Tick.bounds();
        assert_eq!(bounds[0], (1.0, 5.0));
        assert_eq!(bounds[3], (1.0, 10.0));

        let bounds = TuneMode::Sync.bounds();
        assert_eq!(bounds[5], (0.5, 0.9)); // locked threshold is the gate
        assert_eq!(bounds[12], (100.0, 400.0));
    }

    #[test]
    fn wire_and_file_rendering() {
        let max_misses = &TICK_CORRELATOR.specs[1];
        assert_eq!(max_misses.wire_value(5.4), "5");
        assert_eq!(max_misses.file_value(5.4), "5");

        let threshold = &TICK_DETECTOR.specs[0];
        assert_eq!(threshold.file_value(2.5), "2.500000");

        let min_duration = &TICK_DETECTOR.specs[3];
        assert_eq!(min_duration.file_value(5.125), "5.13");
    }

    #[test]
    fn midpoint_seeding() {
        assert_eq!(TICK_DETECTOR.specs[0].midpoint(), 3.0);
        assert_eq!(TICK_CORRELATOR.specs[1].midpoint(), 6.0);
    }

    #[test]
    fn telemetry_channel_per_mode() {
        assert_eq!(TuneMode::Tick.telemetry_channel(), "CORR");
        assert_eq!(TuneMode::Marker.telemetry_channel(), "MARK");
        assert_eq!(TuneMode::Sync.telemetry_channel(), "SYNC");
        assert_eq!(TuneMode::All.telemetry_channel(), "CORR");
    }
}
