//! Reconciliation policy thresholds

use serde::{Deserialize, Serialize};

pub const EVOLUTION_OVERLAP: f64 = 0.9;
pub const EVOLUTION_JACCARD: f64 = 0.7;
pub const GROWTH_JACCARD: f64 = 0.4;
pub const SPLIT_OVERLAP_MAX: f64 = 0.6;
pub const SPLIT_COVERAGE_MIN: f64 = 0.8;
pub const DRASTIC_OVERLAP_MIN: f64 = 0.5;
pub const MERGE_OVERLAP_MIN: f64 = 0.5;
pub const MERGE_COVERAGE_MIN: f64 = 0.8;

/// Every threshold the engine compares against
///
/// Lower bounds are inclusive (`>=`); `split_overlap_max` is an exclusive
/// upper bound (`<`). Deserializes with per-field defaults, so a config may
/// override any subset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum overlap for evolution and growth
    pub evolution_overlap: f64,
    pub evolution_jaccard: f64,
    /// Minimum jaccard for growth and drastic change
    pub growth_jaccard: f64,
    /// Best overlap must stay below this for a split to be considered
    pub split_overlap_max: f64,
    pub split_coverage_min: f64,
    pub drastic_overlap_min: f64,
    pub merge_overlap_min: f64,
    pub merge_coverage_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            evolution_overlap: EVOLUTION_OVERLAP,
            evolution_jaccard: EVOLUTION_JACCARD,
            growth_jaccard: GROWTH_JACCARD,
            split_overlap_max: SPLIT_OVERLAP_MAX,
            split_coverage_min: SPLIT_COVERAGE_MIN,
            drastic_overlap_min: DRASTIC_OVERLAP_MIN,
            merge_overlap_min: MERGE_OVERLAP_MIN,
            merge_coverage_min: MERGE_COVERAGE_MIN,
        }
    }
}
