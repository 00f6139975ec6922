//! Reconciliation of a fresh clustering against the persisted one
//!
//! The external clusterer labels the whole corpus from scratch on every run,
//! so its labels carry no identity. The engine compares each persisted
//! cluster with the new labels and decides which persisted ids survive, and
//! into which label.
//!
//! **Algorithm:**
//! 1. Build the sparse `(old id, new label)` intersection index
//! 2. Classify every old cluster against its best candidate label
//! 3. Detect merges on the index inverted by label
//! 4. Derive the disappeared ids and the unclaimed (new) labels

use super::metrics::{IntersectionIndex, PairMetrics};
use super::thresholds::Thresholds;
use crate::partition::{ClusterId, ItemId, Label, Partition};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// What happened to one old cluster, or to one new label
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Same fault class, membership barely moved
    Evolution {
        label: Label,
        jaccard: f64,
        overlap: f64,
    },
    /// Fully contained, but the new cluster is noticeably larger or smaller
    Growth {
        label: Label,
        jaccard: f64,
        overlap: f64,
    },
    /// Spread across several labels, largest intersection first
    Split { labels: Vec<Label>, coverage: f64 },
    DrasticChange {
        label: Label,
        jaccard: f64,
        overlap: f64,
    },
    /// Survivor of a merge of several old clusters into one label
    MergedInto { label: Label },
    Disappeared,
    New,
}

impl Outcome {
    /// Single destination label, if the outcome has exactly one
    pub fn destination(&self) -> Option<&Label> {
        match self {
            Outcome::Evolution { label, .. }
            | Outcome::Growth { label, .. }
            | Outcome::DrasticChange { label, .. }
            | Outcome::MergedInto { label } => Some(label),
            Outcome::Split { .. } | Outcome::Disappeared | Outcome::New => None,
        }
    }

    /// Every label this outcome claims
    pub fn claimed_labels(&self) -> Vec<&Label> {
        match self {
            Outcome::Split { labels, .. } => labels.iter().collect(),
            other => other.destination().into_iter().collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Evolution { .. } => "evolution",
            Outcome::Growth { .. } => "growth",
            Outcome::Split { .. } => "split",
            Outcome::DrasticChange { .. } => "drastic_change",
            Outcome::MergedInto { .. } => "merged_into",
            Outcome::Disappeared => "disappeared",
            Outcome::New => "new",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Evolution {
                label,
                jaccard,
                overlap,
            }
            | Outcome::Growth {
                label,
                jaccard,
                overlap,
            }
            | Outcome::DrasticChange {
                label,
                jaccard,
                overlap,
            } => write!(
                f,
                "{} -> {} (jaccard={:.3}, overlap={:.3})",
                self.kind(),
                label,
                jaccard,
                overlap
            ),
            Outcome::Split { labels, coverage } => {
                write!(f, "split -> [{}] (coverage={:.3})", labels.join(", "), coverage)
            }
            Outcome::MergedInto { label } => write!(f, "merged_into -> {}", label),
            Outcome::Disappeared | Outcome::New => f.write_str(self.kind()),
        }
    }
}

/// Several old clusters folded into one new label
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub label: Label,
    /// Qualifying old clusters, highest overlap first
    pub contributors: Vec<ClusterId>,
    /// Share of the label's items covered by the contributors
    pub coverage: f64,
    /// Old id carried into the label; `None` when no contributor was eligible
    pub survivor: Option<ClusterId>,
    /// Contributors whose records are removed
    pub retired: Vec<ClusterId>,
}

/// Full decision set of one reconciliation run
///
/// Every old id is either a key of `mapping` or listed in
/// `disappeared_ids`, never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    pub mapping: BTreeMap<ClusterId, Outcome>,
    pub new_labels: Vec<Label>,
    pub disappeared_ids: Vec<ClusterId>,
    pub merges: Vec<Merge>,
}

impl ReconciliationResult {
    /// Old ids whose records must go
    pub fn ids_to_remove(&self) -> BTreeSet<ClusterId> {
        self.disappeared_ids.iter().copied().collect()
    }

    /// Outcome of an old cluster
    pub fn outcome_of(&self, old_id: ClusterId) -> Outcome {
        self.mapping
            .get(&old_id)
            .cloned()
            .unwrap_or(Outcome::Disappeared)
    }

    /// One line per old cluster and per new label, for reports
    pub fn entries(&self) -> Vec<(String, Outcome)> {
        let mut ids: Vec<ClusterId> = self.mapping.keys().copied().collect();
        ids.extend(self.disappeared_ids.iter().copied());
        ids.sort_unstable();

        let mut entries: Vec<(String, Outcome)> = ids
            .into_iter()
            .map(|id| (format!("cluster {}", id), self.outcome_of(id)))
            .collect();
        entries.extend(
            self.new_labels
                .iter()
                .map(|label| (format!("label {}", label), Outcome::New)),
        );
        entries
    }

    /// Old cluster count per outcome kind
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for outcome in self.mapping.values() {
            *counts.entry(outcome.kind()).or_insert(0) += 1;
        }
        if !self.disappeared_ids.is_empty() {
            counts.insert("disappeared", self.disappeared_ids.len());
        }
        if !self.new_labels.is_empty() {
            counts.insert("new", self.new_labels.len());
        }
        counts
    }

    pub fn log_summary(&self) {
        let counts = self.counts();
        let count = |kind: &str| counts.get(kind).copied().unwrap_or(0);

        info!(
            evolution = count("evolution"),
            growth = count("growth"),
            drastic_change = count("drastic_change"),
            split = count("split"),
            merged_into = count("merged_into"),
            new = count("new"),
            disappeared = count("disappeared"),
            merges = self.merges.len(),
            "Reconciliation summary"
        );

        for (id, outcome) in &self.mapping {
            debug!(cluster_id = id, "{}", outcome);
        }
        for merge in &self.merges {
            info!(
                label = %merge.label,
                contributors = ?merge.contributors,
                survivor = ?merge.survivor,
                retired = ?merge.retired,
                coverage = merge.coverage,
                "Merge detected"
            );
        }
        if !self.disappeared_ids.is_empty() {
            info!(ids = ?self.disappeared_ids, "Clusters disappeared");
        }
        if !self.new_labels.is_empty() {
            info!(labels = ?self.new_labels, "New clusters");
        }
    }
}

/// Ranks candidates by overlap, then jaccard, then intersection size.
/// Ties fall to the lexically smaller label.
fn rank(a: (&Label, &PairMetrics), b: (&Label, &PairMetrics)) -> Ordering {
    a.1.overlap
        .total_cmp(&b.1.overlap)
        .then(a.1.jaccard.total_cmp(&b.1.jaccard))
        .then(a.1.intersection.cmp(&b.1.intersection))
        .then_with(|| b.0.cmp(a.0))
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    thresholds: Thresholds,
}

impl ReconciliationEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn reconcile(
        &self,
        old: &Partition<ClusterId>,
        new: &Partition<Label>,
    ) -> ReconciliationResult {
        if old.is_empty() {
            return ReconciliationResult {
                new_labels: new.keys().cloned().collect(),
                ..Default::default()
            };
        }

        let index = IntersectionIndex::build(old, new);
        debug!(
            old_clusters = old.len(),
            new_labels = new.len(),
            pairs = index.len(),
            "Built intersection index"
        );

        let mut mapping = BTreeMap::new();
        for (&old_id, items) in old.iter() {
            if let Some(outcome) = self.classify(old_id, items, &index) {
                mapping.insert(old_id, outcome);
            }
        }

        let merges = self.detect_merges(&index, new, &mut mapping);

        let disappeared_ids = old
            .keys()
            .filter(|id| !mapping.contains_key(*id))
            .copied()
            .collect();

        let claimed: BTreeSet<&Label> = mapping
            .values()
            .flat_map(Outcome::claimed_labels)
            .collect();
        let new_labels = new
            .keys()
            .filter(|label| !claimed.contains(label))
            .cloned()
            .collect();

        ReconciliationResult {
            mapping,
            new_labels,
            disappeared_ids,
            merges,
        }
    }

    /// First matching rule against the best candidate; `None` means disappeared
    fn classify(
        &self,
        old_id: ClusterId,
        items: &BTreeSet<ItemId>,
        index: &IntersectionIndex,
    ) -> Option<Outcome> {
        let t = &self.thresholds;
        let candidates = index.for_old(old_id);
        let (label, best) = candidates.iter().copied().max_by(|a, b| rank(*a, *b))?;

        let jaccard = best.jaccard;
        let overlap = best.overlap;
        let label = label.clone();

        if overlap >= t.evolution_overlap && jaccard >= t.evolution_jaccard {
            return Some(Outcome::Evolution {
                label,
                jaccard,
                overlap,
            });
        }
        if overlap >= t.evolution_overlap && jaccard >= t.growth_jaccard {
            return Some(Outcome::Growth {
                label,
                jaccard,
                overlap,
            });
        }
        if overlap < t.split_overlap_max {
            if let Some((labels, coverage)) = self.split_cover(items.len(), &candidates) {
                return Some(Outcome::Split { labels, coverage });
            }
        }
        if overlap >= t.drastic_overlap_min && jaccard >= t.growth_jaccard {
            return Some(Outcome::DrasticChange {
                label,
                jaccard,
                overlap,
            });
        }
        None
    }

    /// Greedy cover of the old cluster by its largest intersections
    ///
    /// Intersections of one old cluster with distinct labels are disjoint,
    /// so the running sum is the deduplicated coverage.
    fn split_cover(
        &self,
        old_len: usize,
        candidates: &[(&Label, &PairMetrics)],
    ) -> Option<(Vec<Label>, f64)> {
        if old_len == 0 || candidates.len() < 2 {
            return None;
        }

        let mut ordered = candidates.to_vec();
        ordered.sort_by(|a, b| b.1.intersection.cmp(&a.1.intersection).then(a.0.cmp(b.0)));

        let mut covered = 0usize;
        let mut labels = Vec::new();
        for (label, metrics) in ordered {
            covered += metrics.intersection;
            labels.push(label.clone());
            let coverage = covered as f64 / old_len as f64;
            if coverage >= self.thresholds.split_coverage_min {
                return (labels.len() >= 2).then_some((labels, coverage));
            }
        }
        None
    }

    fn detect_merges(
        &self,
        index: &IntersectionIndex,
        new: &Partition<Label>,
        mapping: &mut BTreeMap<ClusterId, Outcome>,
    ) -> Vec<Merge> {
        let t = &self.thresholds;
        let mut merges = Vec::new();
        let mut taken: BTreeSet<ClusterId> = BTreeSet::new();

        for (label, pairs) in index.by_label() {
            let mut qualifying: Vec<(ClusterId, &PairMetrics)> = pairs
                .into_iter()
                .filter(|(_, m)| m.overlap >= t.merge_overlap_min)
                .collect();
            if qualifying.len() < 2 {
                continue;
            }

            let label_len = new.get(label).map_or(0, BTreeSet::len);
            if label_len == 0 {
                continue;
            }
            let covered: usize = qualifying.iter().map(|(_, m)| m.intersection).sum();
            let coverage = covered as f64 / label_len as f64;
            if coverage < t.merge_coverage_min {
                continue;
            }

            qualifying.sort_by(|a, b| b.1.overlap.total_cmp(&a.1.overlap).then(a.0.cmp(&b.0)));
            let contributors: Vec<ClusterId> = qualifying.iter().map(|(id, _)| *id).collect();

            let eligible: Vec<ClusterId> = contributors
                .iter()
                .copied()
                .filter(|id| !taken.contains(id))
                .filter(|id| match mapping.get(id) {
                    Some(Outcome::Evolution { label: dest, .. }) => dest == label,
                    _ => true,
                })
                .collect();

            let survivor = eligible.iter().copied().min();

            let mut retired = Vec::new();
            if let Some(survivor) = survivor {
                let evolved = matches!(
                    mapping.get(&survivor),
                    Some(Outcome::Evolution { label: dest, .. }) if dest == label
                );
                if !evolved {
                    mapping.insert(
                        survivor,
                        Outcome::MergedInto {
                            label: label.clone(),
                        },
                    );
                }
                for id in eligible.iter().copied().filter(|id| *id != survivor) {
                    mapping.remove(&id);
                    retired.push(id);
                }
                retired.sort_unstable();
                taken.insert(survivor);
                taken.extend(retired.iter().copied());
            }

            merges.push(Merge {
                label: label.clone(),
                contributors,
                coverage,
                survivor,
                retired,
            });
        }

        merges
    }
}
