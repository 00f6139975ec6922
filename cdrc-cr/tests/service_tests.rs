//! Clustering runs end to end with a fake clusterer

mod helpers;

use cdrc_common::db::CoredumpRepository;
use cdrc_cr::reconcile::ReconciliationEngine;
use cdrc_cr::service::{ClusteringService, RunOutcome, SkipReason};
use cdrc_cr::snapshot::SnapshotBuilder;
use cdrc_cr::trigger::{TriggerDecision, TriggerEvaluator, TriggerStateStore};
use helpers::{
    assignments, clustering_paths, create_test_repo, raw_name, register_device, seed_coredumps,
    FakeClusterer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn service(
    dir: &Path,
    repo: Arc<dyn CoredumpRepository>,
    clusterer: Arc<FakeClusterer>,
) -> Arc<ClusteringService> {
    let (processing, state, output) = clustering_paths(dir);
    Arc::new(ClusteringService::new(
        repo,
        clusterer,
        TriggerEvaluator::default(),
        TriggerStateStore::new(state),
        SnapshotBuilder::new(processing),
        output,
        ReconciliationEngine::default(),
    ))
}

#[tokio::test]
async fn test_small_corpus_does_not_run() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    seed_coredumps(&repo, dir.path(), fw, 1..=1).await;

    let clusterer = Arc::new(FakeClusterer::new(&[(1, "0")]));
    let service = service(dir.path(), Arc::new(repo), clusterer.clone());

    let outcome = service.run_once().await;

    assert_eq!(
        outcome,
        RunOutcome::Skipped(SkipReason::Trigger(TriggerDecision::InsufficientCorpus { total: 1 }))
    );
    assert_eq!(clusterer.call_count(), 0);
    assert!(service.last_run().is_some());
}

#[tokio::test]
async fn test_first_run_creates_clusters_and_records_state() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    let ids = seed_coredumps(&repo, dir.path(), fw, 1..=5).await;
    let repo = Arc::new(repo);

    let clusterer = Arc::new(FakeClusterer::new(&[
        (1, "0"),
        (2, "0"),
        (3, "0"),
        (4, "1"),
        (5, "1"),
    ]));
    let service = service(dir.path(), repo.clone(), clusterer.clone());

    let outcome = service.run_once().await;

    let RunOutcome::Applied(summary) = outcome else {
        panic!("expected an applied run, got {:?}", outcome);
    };
    assert_eq!(summary.created, 2);
    assert_eq!(summary.reassigned, 5);
    assert_eq!(clusterer.last_snapshot(), (1..=5).map(raw_name).collect::<Vec<_>>());

    let current = assignments(&repo).await;
    assert_eq!(current[&ids[0]], current[&ids[2]]);
    assert_ne!(current[&ids[0]], current[&ids[3]]);
    assert!(current.values().all(Option::is_some));
    assert_eq!(repo.count_unclustered().await.unwrap(), 0);

    let (processing, state, _) = clustering_paths(dir.path());
    assert!(!processing.exists());
    assert!(TriggerStateStore::new(state).read_last_run() > 0.0);
}

#[tokio::test]
async fn test_ids_survive_reclustering() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    let first = seed_coredumps(&repo, dir.path(), fw, 1..=5).await;
    let repo = Arc::new(repo);

    let clusterer = Arc::new(FakeClusterer::new(&[
        (1, "0"),
        (2, "0"),
        (3, "0"),
        (4, "1"),
        (5, "1"),
    ]));
    let service = service(dir.path(), repo.clone(), clusterer.clone());
    assert!(matches!(service.run_once().await, RunOutcome::Applied(_)));
    let before = assignments(&repo).await;

    let second = seed_coredumps(&repo, dir.path(), fw, 6..=10).await;
    // Fresh labels with swapped names; both old clusters grow
    clusterer.set_labels(&[
        (1, "1"),
        (2, "1"),
        (3, "1"),
        (6, "1"),
        (7, "1"),
        (4, "0"),
        (5, "0"),
        (8, "0"),
        (9, "0"),
        (10, "2"),
    ]);

    let RunOutcome::Applied(summary) = service.run_once().await else {
        panic!("expected an applied run");
    };
    assert_eq!(summary.inherited, 2);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.removed, 0);

    let after = assignments(&repo).await;
    assert_eq!(after[&first[0]], before[&first[0]]);
    assert_eq!(after[&second[0]], before[&first[0]]);
    assert_eq!(after[&first[3]], before[&first[3]]);
    assert_eq!(after[&second[2]], before[&first[3]]);
    assert_ne!(after[&second[4]], before[&first[0]]);
    assert_ne!(after[&second[4]], before[&first[3]]);
}

#[tokio::test]
async fn test_failed_clusterer_leaves_state_untouched() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    seed_coredumps(&repo, dir.path(), fw, 1..=5).await;
    let repo = Arc::new(repo);

    let clusterer = Arc::new(FakeClusterer::failing());
    let service = service(dir.path(), repo.clone(), clusterer.clone());

    let outcome = service.run_once().await;

    assert!(matches!(outcome, RunOutcome::Failed(_)));
    assert_eq!(clusterer.call_count(), 1);
    assert_eq!(repo.count_unclustered().await.unwrap(), 5);

    let (processing, state, _) = clustering_paths(dir.path());
    assert!(!processing.exists());
    assert!(!state.exists());
    assert!(service.last_run().unwrap().outcome.starts_with("failed"));
}

#[tokio::test]
async fn test_missing_raw_files_abort_run() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    seed_coredumps(&repo, dir.path(), fw, 1..=5).await;
    for n in 2..=5 {
        std::fs::remove_file(dir.path().join("raws").join(raw_name(n))).unwrap();
    }

    let clusterer = Arc::new(FakeClusterer::new(&[(1, "0")]));
    let service = service(dir.path(), Arc::new(repo), clusterer.clone());

    let outcome = service.run_once().await;

    assert_eq!(
        outcome,
        RunOutcome::Skipped(SkipReason::InsufficientSnapshot { copied: 1 })
    );
    assert_eq!(clusterer.call_count(), 0);
    let (processing, state, _) = clustering_paths(dir.path());
    assert!(!processing.exists());
    assert!(!state.exists());
}

#[tokio::test]
async fn test_overlapping_runs_are_skipped() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    seed_coredumps(&repo, dir.path(), fw, 1..=5).await;

    let clusterer = Arc::new(
        FakeClusterer::new(&[(1, "0"), (2, "0"), (3, "0"), (4, "0"), (5, "0")])
            .with_delay(Duration::from_millis(300)),
    );
    let service = service(dir.path(), Arc::new(repo), clusterer.clone());

    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(service.run_once().await, RunOutcome::Skipped(SkipReason::Busy));
    assert!(matches!(running.await.unwrap(), RunOutcome::Applied(_)));
    assert_eq!(clusterer.call_count(), 1);
}

#[tokio::test]
async fn test_unclustered_without_raw_files_is_not_pending() {
    let (dir, repo) = create_test_repo().await;
    let fw = register_device(&repo, dir.path()).await;
    seed_coredumps(&repo, dir.path(), fw, 1..=5).await;
    for n in 4..=5 {
        std::fs::remove_file(dir.path().join("raws").join(raw_name(n))).unwrap();
    }
    let repo = Arc::new(repo);

    let clusterer = Arc::new(FakeClusterer::new(&[(1, "0"), (2, "0"), (3, "0")]));
    let (processing, state, output) = clustering_paths(dir.path());
    // Zero interval: anything pending is always due
    let service = ClusteringService::new(
        repo.clone(),
        clusterer.clone(),
        TriggerEvaluator::new(5, Duration::ZERO),
        TriggerStateStore::new(state),
        SnapshotBuilder::new(processing),
        output,
        ReconciliationEngine::default(),
    );

    assert!(matches!(service.run_once().await, RunOutcome::Applied(_)));
    assert_eq!(repo.count_unclustered().await.unwrap(), 2);

    assert_eq!(
        service.run_once().await,
        RunOutcome::Skipped(SkipReason::Trigger(TriggerDecision::NothingPending))
    );
    assert_eq!(clusterer.call_count(), 1);
}
