//! Cluster identity across re-clustering runs

pub mod applier;
pub mod engine;
pub mod metrics;
pub mod thresholds;

pub use applier::{ApplyPlan, ApplySummary, ReconciliationApplier};
pub use engine::{Merge, Outcome, ReconciliationEngine, ReconciliationResult};
pub use metrics::{IntersectionIndex, PairMetrics};
pub use thresholds::Thresholds;
