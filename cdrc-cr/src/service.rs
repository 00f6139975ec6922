//! Serialized clustering run
//!
//! One run goes trigger → snapshot → external clusterer → reconcile → apply,
//! and only a successful apply advances the trigger state. Runs never
//! overlap: a run that finds another one in progress is skipped.
//!
//! Unclustered coredumps whose raw file is gone can never enter a snapshot,
//! so they do not count as pending work.

use crate::clusterer::{read_label_csv, CorpusClusterer};
use crate::error::ClusterResult;
use crate::partition::{ClusterId, Label, Partition};
use crate::reconcile::{ApplySummary, ReconciliationApplier, ReconciliationEngine};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::trigger::{unix_now, TriggerDecision, TriggerEvaluator, TriggerStateStore, MIN_CORPUS_SIZE};
use cdrc_common::db::{Coredump, CoredumpRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Another run holds the lock
    Busy,
    Trigger(TriggerDecision),
    InsufficientSnapshot { copied: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Applied(ApplySummary),
    Failed(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Skipped(SkipReason::Busy) => f.write_str("skipped: busy"),
            RunOutcome::Skipped(SkipReason::Trigger(decision)) => {
                write!(f, "skipped: {:?}", decision)
            }
            RunOutcome::Skipped(SkipReason::InsufficientSnapshot { copied }) => {
                write!(f, "skipped: snapshot has {} file(s)", copied)
            }
            RunOutcome::Applied(s) => write!(
                f,
                "applied: removed={} created={} inherited={} reassigned={} unresolved={}",
                s.removed, s.created, s.inherited, s.reassigned, s.unresolved
            ),
            RunOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Most recent completed `run_once`, for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub at: DateTime<Utc>,
    pub outcome: String,
}

pub struct ClusteringService {
    repo: Arc<dyn CoredumpRepository>,
    clusterer: Arc<dyn CorpusClusterer>,
    trigger: TriggerEvaluator,
    state: TriggerStateStore,
    snapshots: SnapshotBuilder,
    output_csv: PathBuf,
    engine: ReconciliationEngine,
    applier: ReconciliationApplier,
    run_lock: tokio::sync::Mutex<()>,
    last_run: Mutex<Option<LastRun>>,
    missing_raws: AtomicUsize,
}

impl ClusteringService {
    pub fn new(
        repo: Arc<dyn CoredumpRepository>,
        clusterer: Arc<dyn CorpusClusterer>,
        trigger: TriggerEvaluator,
        state: TriggerStateStore,
        snapshots: SnapshotBuilder,
        output_csv: PathBuf,
        engine: ReconciliationEngine,
    ) -> Self {
        Self {
            applier: ReconciliationApplier::new(Arc::clone(&repo)),
            repo,
            clusterer,
            trigger,
            state,
            snapshots,
            output_csv,
            engine,
            run_lock: tokio::sync::Mutex::new(()),
            last_run: Mutex::new(None),
            missing_raws: AtomicUsize::new(0),
        }
    }

    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn run_once(&self) -> RunOutcome {
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!("Clustering run already in progress");
            return RunOutcome::Skipped(SkipReason::Busy);
        };

        let outcome = match self.run_locked().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Clustering run failed");
                RunOutcome::Failed(e.to_string())
            }
        };

        *self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(LastRun {
            at: Utc::now(),
            outcome: outcome.to_string(),
        });
        outcome
    }

    async fn run_locked(&self) -> ClusterResult<RunOutcome> {
        let total = self.repo.count_coredumps().await?.max(0) as u64;
        let unclustered = self.pending_count().await?;
        let decision = self
            .trigger
            .evaluate(total, unclustered, self.state.read_last_run(), unix_now());

        if !decision.should_run() {
            debug!(?decision, "Clustering not triggered");
            return Ok(RunOutcome::Skipped(SkipReason::Trigger(decision)));
        }
        info!(?decision, "Clustering triggered");

        let corpus = self.repo.list_coredumps().await?;
        let snapshot = self.snapshots.build(&corpus).await?;

        let result = if (snapshot.copied() as u64) < MIN_CORPUS_SIZE {
            warn!(copied = snapshot.copied(), "Not enough coredumps on disk to cluster");
            Ok(RunOutcome::Skipped(SkipReason::InsufficientSnapshot {
                copied: snapshot.copied(),
            }))
        } else {
            self.cluster_and_apply(&snapshot, &corpus)
                .await
                .map(RunOutcome::Applied)
        };
        snapshot.cleanup().await;

        let outcome = result?;
        if matches!(outcome, RunOutcome::Applied(_)) {
            self.state.write_last_run(unix_now())?;
        }
        Ok(outcome)
    }

    /// Unclustered coredumps that still have a raw file on disk
    async fn pending_count(&self) -> ClusterResult<u64> {
        if self.repo.count_unclustered().await? <= 0 {
            self.missing_raws.store(0, Ordering::Relaxed);
            return Ok(0);
        }

        let mut pending = 0u64;
        let mut missing = 0usize;
        for coredump in self.repo.list_coredumps().await? {
            if coredump.cluster_id.is_some() {
                continue;
            }
            if tokio::fs::try_exists(&coredump.raw_dump_path)
                .await
                .unwrap_or(false)
            {
                pending += 1;
            } else {
                missing += 1;
            }
        }

        let previous = self.missing_raws.swap(missing, Ordering::Relaxed);
        if missing > 0 && missing != previous {
            warn!(missing, "Unclustered coredumps without raw files, not pending");
        }
        Ok(pending)
    }

    async fn cluster_and_apply(
        &self,
        snapshot: &Snapshot,
        corpus: &[Coredump],
    ) -> ClusterResult<ApplySummary> {
        self.clusterer.cluster(snapshot.dir(), &self.output_csv).await?;
        let rows = read_label_csv(&self.output_csv).await?;

        let new = label_partition(snapshot.files(), rows);
        let old = persisted_partition(corpus);
        info!(
            old_clusters = old.len(),
            new_labels = new.len(),
            items = new.item_count(),
            "Reconciling clustering"
        );

        let result = self.engine.reconcile(&old, &new);
        result.log_summary();
        self.applier.apply(&result, &new).await
    }

    /// Evaluate every `interval` until cancelled
    pub fn spawn_loop(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Clustering loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = service.run_once().await;
                        if let RunOutcome::Applied(_) = outcome {
                            info!(%outcome, "Clustering run complete");
                        }
                    }
                }
            }
        })
    }
}

/// New partition from clusterer rows, keyed through the snapshot index
///
/// Unknown file names are skipped; an item listed twice keeps its first label.
pub fn label_partition(
    files: &BTreeMap<String, i64>,
    rows: Vec<(String, String)>,
) -> Partition<Label> {
    let mut assignments = Vec::with_capacity(rows.len());
    for (file, label) in rows {
        match files.get(&file) {
            Some(&coredump_id) => assignments.push((coredump_id, label)),
            None => warn!(file = %file, "Clusterer labelled a file outside the snapshot"),
        }
    }

    let (partition, duplicates) = Partition::from_assignments(assignments);
    for coredump_id in duplicates {
        warn!(coredump_id, "Coredump labelled twice, keeping first label");
    }
    partition
}

/// Current persisted clustering of the corpus
pub fn persisted_partition(corpus: &[Coredump]) -> Partition<ClusterId> {
    let (partition, _) = Partition::from_assignments(
        corpus
            .iter()
            .filter_map(|c| c.cluster_id.map(|cluster_id| (c.coredump_id, cluster_id))),
    );
    partition
}
