//! Decides when a re-clustering run is due
//!
//! A run starts when enough unclustered coredumps have piled up, or when
//! anything is pending and the last successful run is older than the maximum
//! interval. The last-run timestamp lives in a small state file next to the
//! clustering output.

use cdrc_common::config::atomic_write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Clustering needs at least two items
pub const MIN_CORPUS_SIZE: u64 = 2;

pub const MIN_NEW_THRESHOLD: u64 = 5;

pub const MAX_INTERVAL_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDecision {
    InsufficientCorpus { total: u64 },
    NothingPending,
    PendingThreshold { unclustered: u64 },
    IntervalElapsed { unclustered: u64, elapsed_secs: f64 },
    Waiting { unclustered: u64, elapsed_secs: f64 },
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        matches!(
            self,
            TriggerDecision::PendingThreshold { .. } | TriggerDecision::IntervalElapsed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerEvaluator {
    min_new: u64,
    max_interval: Duration,
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new(MIN_NEW_THRESHOLD, Duration::from_secs(MAX_INTERVAL_SECONDS))
    }
}

impl TriggerEvaluator {
    pub fn new(min_new: u64, max_interval: Duration) -> Self {
        Self {
            min_new,
            max_interval,
        }
    }

    /// `last_run` and `now` are Unix seconds; `last_run == 0` means never
    pub fn evaluate(&self, total: u64, unclustered: u64, last_run: f64, now: f64) -> TriggerDecision {
        if total < MIN_CORPUS_SIZE {
            return TriggerDecision::InsufficientCorpus { total };
        }
        if unclustered == 0 {
            return TriggerDecision::NothingPending;
        }
        if unclustered >= self.min_new {
            return TriggerDecision::PendingThreshold { unclustered };
        }

        let elapsed_secs = now - last_run;
        if elapsed_secs > self.max_interval.as_secs_f64() {
            TriggerDecision::IntervalElapsed {
                unclustered,
                elapsed_secs,
            }
        } else {
            TriggerDecision::Waiting {
                unclustered,
                elapsed_secs,
            }
        }
    }
}

/// Last successful run, persisted as a floating-point Unix timestamp
#[derive(Debug, Clone)]
pub struct TriggerStateStore {
    path: PathBuf,
}

impl TriggerStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 0.0 when the file is missing or unreadable
    pub fn read_last_run(&self) -> f64 {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<f64>() {
                Ok(ts) if ts.is_finite() => ts,
                _ => {
                    warn!(path = %self.path.display(), "Invalid trigger state, treating as never run");
                    0.0
                }
            },
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No trigger state");
                0.0
            }
        }
    }

    pub fn write_last_run(&self, ts: f64) -> cdrc_common::Result<()> {
        atomic_write(&self.path, ts.to_string().as_bytes())
    }
}

/// Current time as fractional Unix seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn test_pending_threshold() {
        let trigger = TriggerEvaluator::default();

        let below = trigger.evaluate(10, 4, NOW, NOW);
        assert!(!below.should_run());
        assert!(matches!(below, TriggerDecision::Waiting { unclustered: 4, .. }));

        let at = trigger.evaluate(10, 5, NOW, NOW);
        assert_eq!(at, TriggerDecision::PendingThreshold { unclustered: 5 });
        assert!(at.should_run());
    }

    #[test]
    fn test_small_corpus_never_runs() {
        let trigger = TriggerEvaluator::default();
        assert_eq!(
            trigger.evaluate(1, 1, 0.0, NOW),
            TriggerDecision::InsufficientCorpus { total: 1 }
        );
        assert!(!trigger.evaluate(0, 0, 0.0, NOW).should_run());
    }

    #[test]
    fn test_nothing_pending_ignores_interval() {
        let trigger = TriggerEvaluator::default();
        assert_eq!(trigger.evaluate(10, 0, 0.0, NOW), TriggerDecision::NothingPending);
    }

    #[test]
    fn test_interval_is_strict() {
        let trigger = TriggerEvaluator::default();

        assert!(!trigger.evaluate(10, 1, NOW - 300.0, NOW).should_run());
        assert!(trigger.evaluate(10, 1, NOW - 301.0, NOW).should_run());
        // never run
        assert!(trigger.evaluate(10, 1, 0.0, NOW).should_run());
    }

    #[test]
    fn test_state_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TriggerStateStore::new(dir.path().join("clustering").join("state.txt"));

        assert_eq!(store.read_last_run(), 0.0);

        store.write_last_run(1_700_000_123.5).unwrap();
        assert_eq!(store.read_last_run(), 1_700_000_123.5);
        assert!(!dir.path().join("clustering").join("state.txt.tmp").exists());
    }

    #[test]
    fn test_invalid_state_reads_as_never_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.txt");
        let store = TriggerStateStore::new(&path);

        std::fs::write(&path, "").unwrap();
        assert_eq!(store.read_last_run(), 0.0);

        std::fs::write(&path, "yesterday").unwrap();
        assert_eq!(store.read_last_run(), 0.0);

        std::fs::write(&path, " 42.25\n").unwrap();
        assert_eq!(store.read_last_run(), 42.25);
    }
}
