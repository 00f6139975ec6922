//! cdrc-ri - coredump receiver and ingest service
//!
//! Subscribes to `<base>/#` on the MQTT broker, reassembles fragmented
//! coredumps per device, stores them under the root folder and registers them
//! (with a decoded report) in the shared database for the clustering service.

use anyhow::{Context, Result};
use cdrc_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, RootFolder, CONFIG_PATH_ENV,
};
use cdrc_common::db::{init_database, CoredumpRepository, SqliteRepository};
use cdrc_common::logging::init_tracing;
use cdrc_ri::config::ReceiverConfig;
use cdrc_ri::services::registration::{register_device, register_firmware};
use cdrc_ri::services::{
    mqtt, ArtifactStore, CoredumpReceiver, DispatchQueue, DockerReportParser,
    IngestionDispatcher, PayloadNormalizer, SessionStore,
};
use cdrc_ri::AppState;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cdrc-ri")]
#[command(about = "Coredump receiver and ingest service", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Root folder holding the database and coredump files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long, env = "CDRC_MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "CDRC_MQTT_PORT")]
    mqtt_port: Option<u16>,

    #[arg(long, env = "CDRC_MQTT_USER")]
    mqtt_user: Option<String>,

    #[arg(long, env = "CDRC_MQTT_PASS", hide_env_values = true)]
    mqtt_pass: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive coredumps (default)
    Run,
    /// Register a firmware build and its ELF
    AddFirmware {
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        elf: PathBuf,
    },
    /// Register a device or move it to another firmware
    AddDevice {
        #[arg(long)]
        mac: String,
        #[arg(long)]
        firmware_id: i64,
        #[arg(long)]
        chip: String,
    },
    /// List registered firmwares and devices
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: ReceiverConfig = load_toml_config(&config_path)?;
    apply_overrides(&mut config, &args);

    init_tracing(&config.logging)?;
    info!("Starting cdrc-ri (coredump receiver)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root = RootFolder::new(resolve_root_folder(
        args.root_folder.as_deref(),
        config.root_folder.as_deref(),
    ));
    root.ensure_directory_exists()
        .with_context(|| format!("Failed to initialize root folder {}", root.path().display()))?;
    info!("Root folder: {}", root.path().display());

    let pool = init_database(&root.database_path()).await?;
    let repo = Arc::new(SqliteRepository::new(pool));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, root, repo).await,
        Command::AddFirmware {
            name,
            version,
            elf,
        } => {
            let id = register_firmware(repo.as_ref(), &name, &version, &elf).await?;
            println!("firmware_id={}", id);
            Ok(())
        }
        Command::AddDevice {
            mac,
            firmware_id,
            chip,
        } => {
            register_device(repo.as_ref(), &mac, firmware_id, &chip).await?;
            Ok(())
        }
        Command::List => {
            for fw in repo.list_firmwares().await? {
                println!("firmware {:>4}  {} {}  {}", fw.firmware_id, fw.name, fw.version, fw.elf_path);
            }
            for dev in repo.list_devices().await? {
                println!(
                    "device {}  firmware={}  chip={}",
                    dev.mac_address,
                    dev.current_firmware_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                    dev.chip_type.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut ReceiverConfig, args: &Args) {
    if let Some(host) = &args.mqtt_host {
        config.mqtt.host = host.clone();
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(user) = &args.mqtt_user {
        config.mqtt.username = Some(user.clone());
    }
    if let Some(pass) = &args.mqtt_pass {
        config.mqtt.password = Some(pass.clone());
    }
}

async fn run(config: ReceiverConfig, root: RootFolder, repo: Arc<SqliteRepository>) -> Result<()> {
    let cancel = CancellationToken::new();
    let sessions = Arc::new(SessionStore::new());

    let parser = Arc::new(DockerReportParser::new(&config.parser, root.reports_dir()));
    let dispatcher = Arc::new(IngestionDispatcher::new(
        repo,
        parser,
        ArtifactStore::new(root.raws_dir()),
    ));
    let (queue, dispatch_task) = DispatchQueue::spawn(
        dispatcher,
        Arc::clone(&sessions),
        config.ingest.dispatch_workers,
        config.ingest.dispatch_queue_capacity,
        cancel.clone(),
    );

    let sweeper = sessions.spawn_sweeper(
        config.ingest.sweep_interval(),
        config.ingest.session_timeout(),
        cancel.clone(),
    );

    let receiver = Arc::new(CoredumpReceiver::new(
        config.mqtt.base_topic.clone(),
        Arc::clone(&sessions),
        PayloadNormalizer::new(config.ingest.accept_base64),
        queue,
    ));

    let mqtt_task = {
        let mqtt_config = config.mqtt.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { mqtt::run_mqtt(&mqtt_config, receiver, cancel).await })
    };

    let addr = format!("127.0.0.1:{}", config.ingest.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Health check: http://{}/health", addr);

    let app = cdrc_ri::build_router(AppState::new(sessions));
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

    for (name, task) in [("mqtt", mqtt_task), ("sweeper", sweeper), ("dispatch", dispatch_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }

    info!("cdrc-ri stopped");
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
