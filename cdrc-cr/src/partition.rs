//! Set-partitions of the corpus
//!
//! A partition maps cluster keys to item sets with every item in at most one
//! cluster. Persisted partitions are keyed by cluster id, the clusterer's
//! output by its transient labels.

use crate::error::PartitionError;
use std::collections::{BTreeMap, BTreeSet};

/// Persisted item (coredump) id
pub type ItemId = i64;

/// Persisted cluster id
pub type ClusterId = i64;

/// Transient label from one clusterer run
pub type Label = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<K: Ord> {
    clusters: BTreeMap<K, BTreeSet<ItemId>>,
    owner: BTreeMap<ItemId, K>,
}

impl<K: Ord> Default for Partition<K> {
    fn default() -> Self {
        Self {
            clusters: BTreeMap::new(),
            owner: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> Partition<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit clusters; an item listed twice is an error
    pub fn from_clusters<I, S>(clusters: I) -> Result<Self, PartitionError>
    where
        I: IntoIterator<Item = (K, S)>,
        S: IntoIterator<Item = ItemId>,
    {
        let mut partition = Self::new();
        for (key, items) in clusters {
            partition.clusters.entry(key.clone()).or_default();
            for item in items {
                if !partition.insert(key.clone(), item) {
                    return Err(PartitionError::DuplicateItem { item });
                }
            }
        }
        Ok(partition)
    }

    /// Build from `(item, key)` pairs; later assignments of an item are
    /// dropped and returned
    pub fn from_assignments<I>(assignments: I) -> (Self, Vec<ItemId>)
    where
        I: IntoIterator<Item = (ItemId, K)>,
    {
        let mut partition = Self::new();
        let mut rejected = Vec::new();
        for (item, key) in assignments {
            if !partition.insert(key, item) {
                rejected.push(item);
            }
        }
        (partition, rejected)
    }

    /// Add `item` to `key`; false if the item already belongs to a cluster
    pub fn insert(&mut self, key: K, item: ItemId) -> bool {
        if self.owner.contains_key(&item) {
            return false;
        }
        self.owner.insert(item, key.clone());
        self.clusters.entry(key).or_default().insert(item);
        true
    }

    pub fn get(&self, key: &K) -> Option<&BTreeSet<ItemId>> {
        self.clusters.get(key)
    }

    pub fn cluster_of(&self, item: ItemId) -> Option<&K> {
        self.owner.get(&item)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.clusters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.clusters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &BTreeSet<ItemId>)> {
        self.clusters.iter()
    }

    /// Number of clusters
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.owner.len()
    }
}
