//! Writes a reconciliation result back to the repository
//!
//! Planning is pure: [`ApplyPlan::build`] decides which old ids are removed,
//! which labels inherit an old id and which labels need a fresh cluster.
//! [`ReconciliationApplier::apply`] then executes the plan in a fixed order:
//! remove, create, resolve, reassign. Removal unassigns members before the
//! cluster row is deleted.

use super::engine::{Outcome, ReconciliationResult};
use crate::error::ClusterResult;
use crate::naming::{self, CrashSignature};
use crate::partition::{ClusterId, ItemId, Label, Partition};
use cdrc_common::db::CoredumpRepository;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Claim priority for a contested label; lower wins
fn claim_rank(outcome: &Outcome) -> Option<u8> {
    match outcome {
        Outcome::Evolution { .. } => Some(0),
        Outcome::MergedInto { .. } => Some(1),
        Outcome::Growth { .. } => Some(2),
        Outcome::DrasticChange { .. } => Some(3),
        Outcome::Split { .. } | Outcome::Disappeared | Outcome::New => None,
    }
}

/// Repository changes derived from one reconciliation result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyPlan {
    /// Old ids whose cluster records are deleted
    pub remove: BTreeSet<ClusterId>,
    /// Labels that get a newly created cluster
    pub create: Vec<Label>,
    /// Labels that keep an old id
    pub inherit: BTreeMap<Label, ClusterId>,
}

impl ApplyPlan {
    pub fn build(result: &ReconciliationResult, new: &Partition<Label>) -> Self {
        let mut remove = result.ids_to_remove();
        let mut inherit: BTreeMap<Label, ClusterId> = BTreeMap::new();

        let mut claims: Vec<(u8, ClusterId, &Label)> = result
            .mapping
            .iter()
            .filter_map(|(id, outcome)| {
                let rank = claim_rank(outcome)?;
                outcome.destination().map(|label| (rank, *id, label))
            })
            .collect();
        claims.sort();

        for (_, old_id, label) in claims {
            if !new.contains_key(label) {
                warn!(cluster_id = old_id, label = %label, "Destination label not in new partition");
                remove.insert(old_id);
            } else if let Some(holder) = inherit.get(label) {
                warn!(
                    cluster_id = old_id,
                    holder = holder,
                    label = %label,
                    "Label already inherited, removing contested cluster"
                );
                remove.insert(old_id);
            } else {
                inherit.insert(label.clone(), old_id);
            }
        }

        for (&old_id, outcome) in &result.mapping {
            let Outcome::Split { labels, .. } = outcome else {
                continue;
            };
            match labels.first() {
                Some(first) if new.contains_key(first) && !inherit.contains_key(first) => {
                    inherit.insert(first.clone(), old_id);
                }
                _ => {
                    warn!(cluster_id = old_id, "Split cluster inherits no label, removing");
                    remove.insert(old_id);
                }
            }
        }

        let create = new
            .keys()
            .filter(|label| !inherit.contains_key(*label))
            .cloned()
            .collect();

        Self {
            remove,
            create,
            inherit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ApplySummary {
    pub removed: usize,
    pub created: usize,
    pub inherited: usize,
    pub reassigned: usize,
    pub unresolved: usize,
}

pub struct ReconciliationApplier {
    repo: Arc<dyn CoredumpRepository>,
}

impl ReconciliationApplier {
    pub fn new(repo: Arc<dyn CoredumpRepository>) -> Self {
        Self { repo }
    }

    pub async fn apply(
        &self,
        result: &ReconciliationResult,
        new: &Partition<Label>,
    ) -> ClusterResult<ApplySummary> {
        let plan = ApplyPlan::build(result, new);
        debug!(?plan, "Apply plan");
        let mut summary = ApplySummary::default();

        // 1. Remove
        for &cluster_id in &plan.remove {
            let unassigned = self.repo.unassign_cluster(cluster_id).await?;
            self.repo.delete_cluster(cluster_id).await?;
            summary.removed += 1;
            info!(cluster_id, unassigned, "Removed cluster");
        }

        // 2. Create
        let mut taken: BTreeSet<String> = self
            .repo
            .list_clusters()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let mut resolved: BTreeMap<&Label, ClusterId> = BTreeMap::new();

        for label in &plan.create {
            let members = new.get(label);
            let base = self.name_for(label, members).await?;
            let name = naming::unique_name(&base, &taken);
            let cluster_id = self.repo.create_cluster(&name).await?;
            info!(cluster_id, label = %label, name = %name, "Created cluster");
            taken.insert(name);
            resolved.insert(label, cluster_id);
            summary.created += 1;
        }

        // 3. Resolve
        for (label, &old_id) in &plan.inherit {
            debug!(cluster_id = old_id, label = %label, "Label inherits cluster id");
            resolved.insert(label, old_id);
            summary.inherited += 1;
        }

        // 4. Reassign
        for (label, items) in new.iter() {
            let target = resolved.get(label).copied();
            if target.is_none() {
                warn!(label = %label, items = items.len(), "Unresolved label, leaving items unassigned");
            }
            for &item in items {
                self.repo.assign_coredump_to_cluster(item, target).await?;
                match target {
                    Some(_) => summary.reassigned += 1,
                    None => summary.unresolved += 1,
                }
            }
        }

        info!(
            removed = summary.removed,
            created = summary.created,
            inherited = summary.inherited,
            reassigned = summary.reassigned,
            unresolved = summary.unresolved,
            "Reconciliation applied"
        );
        Ok(summary)
    }

    /// Name from the smallest member's report, else its raw file stem
    async fn name_for(
        &self,
        label: &str,
        members: Option<&BTreeSet<ItemId>>,
    ) -> ClusterResult<String> {
        let now = chrono::Utc::now().timestamp();
        let Some(&representative) = members.and_then(|m| m.iter().next()) else {
            return Ok(naming::empty_label_name(label, now));
        };

        let Some(coredump) = self.repo.get_coredump(representative).await? else {
            warn!(coredump_id = representative, "Representative coredump not found");
            return Ok(naming::unexpected_name(now));
        };

        if let Some(log_path) = &coredump.log_path {
            match tokio::fs::read_to_string(log_path).await {
                Ok(report) => {
                    if let Some(name) = CrashSignature::parse(&report).name() {
                        return Ok(name);
                    }
                }
                Err(e) => {
                    warn!(coredump_id = representative, path = %log_path, error = %e, "Failed to read report");
                }
            }
        }

        Ok(coredump
            .raw_file_stem()
            .map(|stem| naming::fallback_name(&stem))
            .unwrap_or_else(|| naming::fallback_name(&representative.to_string())))
    }
}
