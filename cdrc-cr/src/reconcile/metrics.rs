//! Set-similarity metrics and the sparse intersection index

use crate::partition::{ClusterId, Label, Partition};
use std::collections::{BTreeMap, BTreeSet};

/// `|A∩B| / |A∪B|`; two empty sets are identical
pub fn jaccard(intersection: usize, a_len: usize, b_len: usize) -> f64 {
    let union = a_len + b_len - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// `|A∩B| / min(|A|,|B|)`; 0 when either set is empty
pub fn overlap(intersection: usize, a_len: usize, b_len: usize) -> f64 {
    let smaller = a_len.min(b_len);
    if smaller == 0 {
        0.0
    } else {
        intersection as f64 / smaller as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMetrics {
    pub intersection: usize,
    pub jaccard: f64,
    pub overlap: f64,
}

impl PairMetrics {
    pub fn new(intersection: usize, old_len: usize, new_len: usize) -> Self {
        Self {
            intersection,
            jaccard: jaccard(intersection, old_len, new_len),
            overlap: overlap(intersection, old_len, new_len),
        }
    }
}

/// Metrics for every `(old id, new label)` pair sharing at least one item
#[derive(Debug, Clone, Default)]
pub struct IntersectionIndex {
    pairs: BTreeMap<(ClusterId, Label), PairMetrics>,
}

impl IntersectionIndex {
    /// One pass over the old items, looking up each item's new label
    pub fn build(old: &Partition<ClusterId>, new: &Partition<Label>) -> Self {
        let mut pairs = BTreeMap::new();

        for (&old_id, old_items) in old.iter() {
            let mut counts: BTreeMap<&Label, usize> = BTreeMap::new();
            for &item in old_items {
                if let Some(label) = new.cluster_of(item) {
                    *counts.entry(label).or_default() += 1;
                }
            }

            for (label, intersection) in counts {
                let new_len = new.get(label).map_or(0, BTreeSet::len);
                pairs.insert(
                    (old_id, label.clone()),
                    PairMetrics::new(intersection, old_items.len(), new_len),
                );
            }
        }

        Self { pairs }
    }

    pub fn get(&self, old_id: ClusterId, label: &str) -> Option<&PairMetrics> {
        self.pairs.get(&(old_id, label.to_string()))
    }

    /// Candidate labels of one old cluster, in label order
    pub fn for_old(&self, old_id: ClusterId) -> Vec<(&Label, &PairMetrics)> {
        self.pairs
            .range((old_id, String::new())..)
            .take_while(|((id, _), _)| *id == old_id)
            .map(|((_, label), metrics)| (label, metrics))
            .collect()
    }

    /// Contributing old clusters per new label
    pub fn by_label(&self) -> BTreeMap<&Label, Vec<(ClusterId, &PairMetrics)>> {
        let mut inverted: BTreeMap<&Label, Vec<(ClusterId, &PairMetrics)>> = BTreeMap::new();
        for ((old_id, label), metrics) in &self.pairs {
            inverted.entry(label).or_default().push((*old_id, metrics));
        }
        inverted
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
