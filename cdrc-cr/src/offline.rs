//! Partitions built from `item,label` CSV rows for offline reconciliation
//!
//! Old labels become cluster ids independent of row order: numeric labels
//! are used as ids directly, anything else is numbered in sorted order. The
//! lowest-id merge survivor is therefore reproducible for the same files.

use crate::partition::{ClusterId, ItemId, Label, Partition};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct OfflinePartitions {
    pub old: Partition<ClusterId>,
    pub new: Partition<Label>,
    /// Original label for every old id
    pub old_names: BTreeMap<ClusterId, String>,
    /// Items listed twice in either file, dropped after their first label
    pub repeated: usize,
}

/// Old label to id, numeric when every label is an integer
fn old_cluster_ids(rows: &[(String, String)]) -> BTreeMap<String, ClusterId> {
    let labels: BTreeSet<&str> = rows.iter().map(|(_, label)| label.as_str()).collect();

    let numeric: Option<BTreeMap<String, ClusterId>> = labels
        .iter()
        .map(|label| label.parse::<ClusterId>().ok().map(|id| (label.to_string(), id)))
        .collect();
    // "01" and "1" would collide
    if let Some(ids) =
        numeric.filter(|ids| ids.values().collect::<BTreeSet<_>>().len() == ids.len())
    {
        return ids;
    }

    labels
        .into_iter()
        .zip(1..)
        .map(|(label, id)| (label.to_string(), id))
        .collect()
}

pub fn partitions_from_rows(
    old_rows: &[(String, String)],
    new_rows: &[(String, String)],
) -> OfflinePartitions {
    let old_ids = old_cluster_ids(old_rows);

    let mut items: BTreeMap<String, ItemId> = BTreeMap::new();
    let mut item_id = |name: &str| -> ItemId {
        let next = items.len() as ItemId + 1;
        *items.entry(name.to_string()).or_insert(next)
    };
    let old_assignments: Vec<(ItemId, ClusterId)> = old_rows
        .iter()
        .filter_map(|(item, label)| old_ids.get(label).map(|&id| (item_id(item), id)))
        .collect();
    let new_assignments: Vec<(ItemId, Label)> = new_rows
        .iter()
        .map(|(item, label)| (item_id(item), label.clone()))
        .collect();

    let (old, old_repeated) = Partition::from_assignments(old_assignments);
    let (new, new_repeated) = Partition::from_assignments(new_assignments);

    OfflinePartitions {
        old,
        new,
        old_names: old_ids.into_iter().map(|(name, id)| (id, name)).collect(),
        repeated: old_repeated.len() + new_repeated.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ReconciliationEngine;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(item, label)| (item.to_string(), label.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_survivor_does_not_depend_on_row_order() {
        let new = rows(&[("a", "X"), ("b", "X"), ("c", "X"), ("d", "X"), ("e", "X")]);
        let forward = rows(&[
            ("a", "alpha"),
            ("b", "alpha"),
            ("c", "alpha"),
            ("d", "beta"),
            ("e", "beta"),
        ]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let survivor = |old: &[(String, String)]| {
            let parts = partitions_from_rows(old, &new);
            let result = ReconciliationEngine::default().reconcile(&parts.old, &parts.new);
            let id = result.merges[0].survivor.unwrap();
            parts.old_names[&id].clone()
        };

        assert_eq!(survivor(&forward), "alpha");
        assert_eq!(survivor(&reversed), "alpha");
    }

    #[test]
    fn test_numeric_labels_keep_their_ids() {
        let old = rows(&[("a", "12"), ("b", "3"), ("c", "12")]);
        let parts = partitions_from_rows(&old, &[]);

        assert_eq!(parts.old.get(&12).unwrap().len(), 2);
        assert_eq!(parts.old.get(&3).unwrap().len(), 1);
        assert_eq!(parts.old_names[&3], "3");
    }

    #[test]
    fn test_mixed_labels_are_numbered_in_sorted_order() {
        let old = rows(&[("a", "zeta"), ("b", "7"), ("c", "alpha")]);
        let parts = partitions_from_rows(&old, &[]);

        assert_eq!(parts.old_names[&1], "7");
        assert_eq!(parts.old_names[&2], "alpha");
        assert_eq!(parts.old_names[&3], "zeta");
    }

    #[test]
    fn test_repeated_items_are_counted() {
        let old = rows(&[("a", "1"), ("a", "2")]);
        let new = rows(&[("a", "X"), ("a", "Y")]);
        let parts = partitions_from_rows(&old, &new);

        assert_eq!(parts.repeated, 2);
        assert_eq!(parts.new.item_count(), 1);
    }
}
