//! cdrc-cr - coredump clustering and reconciliation service
//!
//! Periodically re-clusters the whole coredump corpus with the external
//! compression clusterer and reconciles the result with the persisted
//! clusters, keeping cluster ids stable across runs.

use anyhow::{Context, Result};
use cdrc_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, RootFolder, CONFIG_PATH_ENV,
};
use cdrc_common::db::{init_database, CoredumpRepository, SqliteRepository};
use cdrc_common::logging::init_tracing;
use cdrc_cr::clusterer::{parse_label_csv, DockerCompressionClusterer};
use cdrc_cr::config::ClusteringServiceConfig;
use cdrc_cr::offline::partitions_from_rows;
use cdrc_cr::reconcile::ReconciliationEngine;
use cdrc_cr::service::ClusteringService;
use cdrc_cr::snapshot::SnapshotBuilder;
use cdrc_cr::trigger::{TriggerEvaluator, TriggerStateStore};
use cdrc_cr::AppState;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cdrc-cr")]
#[command(about = "Coredump clustering and reconciliation service", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Root folder holding the database and coredump files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate the trigger periodically and re-cluster when due (default)
    Run,
    /// Evaluate the trigger once
    Once,
    /// Print corpus and cluster totals
    Summary,
    /// Reconcile two `item,label` CSV files without touching the database
    Reconcile {
        #[arg(long)]
        old: PathBuf,
        #[arg(long)]
        new: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config: ClusteringServiceConfig = load_toml_config(&config_path)?;

    init_tracing(&config.logging)?;
    info!("Starting cdrc-cr (clustering and reconciliation)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let command = args.command.unwrap_or(Command::Run);
    if let Command::Reconcile { old, new } = &command {
        return reconcile_files(&config, old, new);
    }

    let root = RootFolder::new(resolve_root_folder(
        args.root_folder.as_deref(),
        config.root_folder.as_deref(),
    ));
    root.ensure_directory_exists()
        .with_context(|| format!("Failed to initialize root folder {}", root.path().display()))?;
    info!("Root folder: {}", root.path().display());

    let pool = init_database(&root.database_path()).await?;
    let repo: Arc<dyn CoredumpRepository> = Arc::new(SqliteRepository::new(pool));

    match command {
        Command::Run => run(config, &root, repo).await,
        Command::Once => {
            let service = build_service(&config, &root, repo);
            let outcome = service.run_once().await;
            println!("{}", outcome);
            Ok(())
        }
        Command::Summary => summary(repo.as_ref()).await,
        Command::Reconcile { .. } => Ok(()),
    }
}

fn build_service(
    config: &ClusteringServiceConfig,
    root: &RootFolder,
    repo: Arc<dyn CoredumpRepository>,
) -> Arc<ClusteringService> {
    let clustering = &config.clustering;
    Arc::new(ClusteringService::new(
        repo,
        Arc::new(DockerCompressionClusterer::new(clustering)),
        TriggerEvaluator::new(clustering.min_new_threshold, clustering.max_interval()),
        TriggerStateStore::new(root.trigger_state_path()),
        SnapshotBuilder::new(root.processing_dir()),
        root.cluster_output_path(),
        ReconciliationEngine::new(clustering.thresholds),
    ))
}

async fn run(
    config: ClusteringServiceConfig,
    root: &RootFolder,
    repo: Arc<dyn CoredumpRepository>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let service = build_service(&config, root, repo);
    let clustering_task = service.spawn_loop(config.clustering.check_interval(), cancel.clone());

    let addr = format!("127.0.0.1:{}", config.clustering.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Health check: http://{}/health", addr);

    let app = cdrc_cr::build_router(AppState::new(service));
    let server_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    if let Err(e) = server.await {
        error!(error = %e, "HTTP server failed");
        cancel.cancel();
    }

    if let Err(e) = clustering_task.await {
        error!(error = %e, "Clustering loop ended abnormally");
    }

    info!("cdrc-cr stopped");
    Ok(())
}

async fn summary(repo: &dyn CoredumpRepository) -> Result<()> {
    let total = repo.count_coredumps().await?;
    let unclustered = repo.count_unclustered().await?;
    let sizes = repo.cluster_sizes().await?;

    println!("coredumps:   {}", total);
    println!("clustered:   {}", total - unclustered);
    println!("unclustered: {}", unclustered);
    println!("clusters:    {}", sizes.len());
    for size in sizes {
        println!("  {:>6}  {:>5}  {}", size.cluster_id, size.coredump_count, size.name);
    }
    Ok(())
}

fn reconcile_files(config: &ClusteringServiceConfig, old: &Path, new: &Path) -> Result<()> {
    let read = |path: &Path| -> Result<Vec<(String, String)>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_label_csv(&content))
    };
    let parts = partitions_from_rows(&read(old)?, &read(new)?);
    if parts.repeated > 0 {
        println!("ignored repeated items: {}", parts.repeated);
    }

    let old_names = &parts.old_names;
    let result =
        ReconciliationEngine::new(config.clustering.thresholds).reconcile(&parts.old, &parts.new);
    result.log_summary();

    for (id, outcome) in &result.mapping {
        println!("{:<24} {}", old_names.get(id).map_or("?", |n| n.as_str()), outcome);
    }
    for id in &result.disappeared_ids {
        println!("{:<24} disappeared", old_names.get(id).map_or("?", |n| n.as_str()));
    }
    for label in &result.new_labels {
        println!("{:<24} new", label);
    }
    for merge in &result.merges {
        let names: Vec<&str> = merge
            .contributors
            .iter()
            .map(|id| old_names.get(id).map_or("?", |n| n.as_str()))
            .collect();
        println!(
            "merge into {}: [{}] coverage={:.3}",
            merge.label,
            names.join(", "),
            merge.coverage
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
