//! Optimization result persistence
//!
//! Two section-based key=value files record tuning outcomes:
//!
//! - the *last-run* file, overwritten on every improvement of the current
//!   run, and
//! - the *all-time-best* file, overwritten for a mode only when a run's
//!   score strictly improves on what is already stored for that mode.
//!
//! Writes are all-or-nothing (temp file + rename), and an unreadable best
//! file is treated as "no prior best" — losing the old record must never
//! abort a tuning run.

use crate::control::params::TuneMode;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Metadata section shared by both result files.
const META_SECTION: &str = "optimization_meta";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Minimal ordered section/key=value document
// ============================================================================

/// An ordered section/key=value document. Sections and keys keep their
/// first-seen order so repeated writes produce stable files.
#[derive(Debug, Clone, Default)]
struct IniDoc {
    sections: Vec<IniSection>,
}

#[derive(Debug, Clone)]
struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniDoc {
    /// Tolerant parse: unrecognized lines are skipped, keys before the
    /// first section header are ignored.
    fn parse(text: &str) -> Self {
        let mut doc = Self::default();
        let mut current: Option<usize> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                doc.sections.push(IniSection {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                current = Some(doc.sections.len() - 1);
                continue;
            }
            if let (Some(idx), Some((key, value))) = (current, line.split_once('=')) {
                doc.sections[idx]
                    .entries
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        doc
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for (key, value) in &section.entries {
                out.push_str(&format!("{key} = {value}\n"));
            }
            out.push('\n');
        }
        out
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, section: &str, key: &str, value: String) {
        let idx = match self.sections.iter().position(|s| s.name == section) {
            Some(i) => i,
            None => {
                self.sections.push(IniSection {
                    name: section.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[idx].entries;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }
}

// ============================================================================
// Result store
// ============================================================================

/// Append/update store for tuning results.
#[derive(Debug, Clone)]
pub struct ParamStore {
    best_path: PathBuf,
    last_run_path: PathBuf,
}

impl ParamStore {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(best_path: P, last_run_path: Q) -> Self {
        Self {
            best_path: best_path.as_ref().to_path_buf(),
            last_run_path: last_run_path.as_ref().to_path_buf(),
        }
    }

    pub fn best_path(&self) -> &Path {
        &self.best_path
    }

    pub fn last_run_path(&self) -> &Path {
        &self.last_run_path
    }

    /// Record one run result. The last-run file is always rewritten; the
    /// all-time-best file only when `score` strictly improves on the
    /// stored score for this mode. Returns whether a new overall best was
    /// recorded.
    pub fn record_result(
        &self,
        values: &[f64],
        mode: TuneMode,
        score: f64,
    ) -> Result<bool, StoreError> {
        self.write_result(&self.last_run_path, values, mode, score)?;
        debug!(path = %self.last_run_path.display(), "Last-run result saved");

        match self.existing_best_score(mode) {
            Some(existing) if score >= existing => {
                debug!(
                    score,
                    existing,
                    mode = %mode,
                    "Score does not improve stored best — best file unchanged"
                );
                Ok(false)
            }
            existing => {
                self.write_result(&self.best_path, values, mode, score)?;
                info!(
                    score,
                    previous = ?existing,
                    mode = %mode,
                    path = %self.best_path.display(),
                    "New overall best saved"
                );
                Ok(true)
            }
        }
    }

    /// Stored all-time-best score for a mode. A missing or unreadable
    /// file, or a missing/garbled score key, means "no prior best".
    pub fn existing_best_score(&self, mode: TuneMode) -> Option<f64> {
        let text = match fs::read_to_string(&self.best_path) {
            Ok(t) => t,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.best_path.display(), error = %e, "Best file unreadable — treating as no prior best");
                }
                return None;
            }
        };
        let doc = IniDoc::parse(&text);

        let score_key = format!("{mode}_best_score");
        if let Some(score) = doc
            .get(META_SECTION, &score_key)
            .and_then(|v| v.parse::<f64>().ok())
        {
            return Some(score);
        }

        // Older files carry only last_mode/last_score.
        if doc.get(META_SECTION, "last_mode") == Some(mode.as_str()) {
            return doc
                .get(META_SECTION, "last_score")
                .and_then(|v| v.parse::<f64>().ok());
        }
        None
    }

    /// Best-file parameter values for a mode, in the mode's parameter order.
    /// `None` if any parameter is missing.
    pub fn saved_best_params(&self, mode: TuneMode) -> Option<Vec<f64>> {
        let text = fs::read_to_string(&self.best_path).ok()?;
        let doc = IniDoc::parse(&text);

        let mut values = Vec::new();
        for family in mode.families() {
            for spec in family.specs {
                values.push(doc.get(family.section, spec.ini_key)?.parse::<f64>().ok()?);
            }
        }
        Some(values)
    }

    /// Update a result file in place: this mode's parameter sections plus
    /// the metadata section, preserving everything else already there.
    fn write_result(
        &self,
        path: &Path,
        values: &[f64],
        mode: TuneMode,
        score: f64,
    ) -> Result<(), StoreError> {
        let mut doc = fs::read_to_string(path)
            .map(|t| IniDoc::parse(&t))
            .unwrap_or_default();

        let mut remaining = values;
        for family in mode.families() {
            for spec in family.specs {
                let Some((value, rest)) = remaining.split_first() else {
                    warn!(mode = %mode, "Parameter vector shorter than mode — truncated write");
                    break;
                };
                remaining = rest;
                doc.set(family.section, spec.ini_key, spec.file_value(*value));
            }
        }

        doc.set(META_SECTION, "last_mode", mode.to_string());
        doc.set(META_SECTION, "last_score", format!("{score:.6}"));
        doc.set(
            META_SECTION,
            "last_run",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        doc.set(META_SECTION, &format!("{mode}_best_score"), format!("{score:.6}"));

        atomic_write(path, &doc.render())
    }
}

/// Write the full content to a temp file next to the target, then rename.
/// Readers never observe a partial file.
fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let write = fs::write(&tmp, content).and_then(|()| fs::rename(&tmp, path));
    write.map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> ParamStore {
        ParamStore::new(
            dir.path().join("optimized_params.ini"),
            dir.path().join("last_run.ini"),
        )
    }

    #[test]
    fn first_result_becomes_best() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let improved = s
            .record_result(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick, 12.5)
            .unwrap();
        assert!(improved);
        assert_eq!(s.existing_best_score(TuneMode::Tick), Some(12.5));

        let text = fs::read_to_string(s.best_path()).unwrap();
        assert!(text.contains("[tick_detector]"));
        assert!(text.contains("threshold_multiplier = 2.500000"));
        assert!(text.contains("min_duration_ms = 5.00"));
        assert!(text.contains("tick_best_score = 12.500000"));
    }

    #[test]
    fn worse_score_leaves_best_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.record_result(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick, 10.0)
            .unwrap();
        let before = fs::read_to_string(s.best_path()).unwrap();

        let improved = s
            .record_result(&[3.0, 0.96, 0.02, 6.0], TuneMode::Tick, 20.0)
            .unwrap();
        assert!(!improved);
        assert_eq!(fs::read_to_string(s.best_path()).unwrap(), before);

        // Last-run always tracks the newest result.
        let last = fs::read_to_string(s.last_run_path()).unwrap();
        assert!(last.contains("last_score = 20.000000"));
    }

    #[test]
    fn repeated_identical_calls_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let values = [0.8, 6.0];
        s.record_result(&values, TuneMode::Corr, 3.25).unwrap();
        let first = fs::read_to_string(s.best_path()).unwrap();

        s.record_result(&values, TuneMode::Corr, 3.25).unwrap();
        let second = fs::read_to_string(s.best_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn best_score_is_monotonic_per_mode() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let values = [3.0, 0.001, 500.0];
        let scores = [50.0, 80.0, 30.0, 45.0, 29.9, 100.0];

        let mut recorded_best = f64::INFINITY;
        for score in scores {
            s.record_result(&values, TuneMode::Marker, score).unwrap();
            let stored = s.existing_best_score(TuneMode::Marker).unwrap();
            assert!(stored <= recorded_best || recorded_best.is_infinite());
            recorded_best = stored;
        }
        assert_eq!(recorded_best, 29.9);
    }

    #[test]
    fn modes_use_disjoint_sections_and_score_keys() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.record_result(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick, 10.0)
            .unwrap();
        s.record_result(&[0.8, 6.0], TuneMode::Corr, 99.0).unwrap();

        // A lousy corr score must not disturb the tick record.
        assert_eq!(s.existing_best_score(TuneMode::Tick), Some(10.0));
        assert_eq!(s.existing_best_score(TuneMode::Corr), Some(99.0));

        let text = fs::read_to_string(s.best_path()).unwrap();
        assert!(text.contains("[tick_detector]"));
        assert!(text.contains("[tick_correlator]"));
        assert!(text.contains("tick_best_score = 10.000000"));
        assert!(text.contains("corr_best_score = 99.000000"));
    }

    #[test]
    fn all_mode_writes_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let values: Vec<f64> = TuneMode::All.specs().iter().map(|p| p.midpoint()).collect();
        s.record_result(&values, TuneMode::All, 42.0).unwrap();

        let text = fs::read_to_string(s.best_path()).unwrap();
        for section in [
            "[tick_detector]",
            "[tick_correlator]",
            "[marker_detector]",
            "[sync_detector]",
        ] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("all_best_score = 42.000000"));
    }

    #[test]
    fn saved_params_round_trip_within_precision() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let written: Vec<f64> = TuneMode::Sync
            .specs()
            .iter()
            .enumerate()
            .map(|(i, p)| p.min + (p.max - p.min) * (i as f64 + 1.0) / 17.0)
            .collect();
        s.record_result(&written, TuneMode::Sync, 5.0).unwrap();

        let read = s.saved_best_params(TuneMode::Sync).unwrap();
        assert_eq!(read.len(), written.len());
        for ((r, w), spec) in read.iter().zip(&written).zip(TuneMode::Sync.specs()) {
            // 6 dp for floats, 2 dp for millisecond durations.
            let tol = match spec.format {
                crate::control::params::ValueFormat::Millis2 => 5e-3,
                _ => 5e-7,
            };
            assert!((r - w).abs() <= tol, "{}: {r} vs {w}", spec.name);
        }
    }

    #[test]
    fn corrupt_best_file_counts_as_no_prior() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        fs::write(s.best_path(), "@@@ not an ini file\n\u{0}\u{1}").unwrap();
        assert_eq!(s.existing_best_score(TuneMode::Tick), None);

        // A new result replaces the wreckage.
        let improved = s
            .record_result(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick, 77.0)
            .unwrap();
        assert!(improved);
        assert_eq!(s.existing_best_score(TuneMode::Tick), Some(77.0));
    }

    #[test]
    fn legacy_last_score_is_used_when_mode_matches() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        fs::write(
            s.best_path(),
            "[optimization_meta]\nlast_mode = tick\nlast_score = 8.000000\n",
        )
        .unwrap();
        assert_eq!(s.existing_best_score(TuneMode::Tick), Some(8.0));
        assert_eq!(s.existing_best_score(TuneMode::Corr), None);
    }

    #[test]
    fn unrelated_sections_survive_updates() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        fs::write(
            s.best_path(),
            "[operator_notes]\nantenna = longwire\n\n[tick_detector]\nthreshold_multiplier = 1.000000\n",
        )
        .unwrap();

        s.record_result(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick, 1.0)
            .unwrap();
        let text = fs::read_to_string(s.best_path()).unwrap();
        assert!(text.contains("[operator_notes]"));
        assert!(text.contains("antenna = longwire"));
        assert!(text.contains("threshold_multiplier = 2.500000"));
    }
}
