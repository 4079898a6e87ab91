//! paket-field - offline-first field-operations engine
//!
//! Operator CLI and daemon for capture and driver devices.
//!
//! # Usage
//!
//! ```bash
//! # Record a captured label (submitted now, or queued if offline)
//! paket-field capture --text "Jl. Sudirman No. 1, Jakarta" --confidence 0.92
//!
//! # Push the pending queue
//! paket-field drain
//!
//! # Driver: pull today's route and work through it
//! paket-field route fetch
//! paket-field route complete
//! paket-field route skip --reason "customer not home"
//!
//! # Background drain scheduler + config hot reload
//! paket-field run
//! ```
//!
//! # Environment Variables
//!
//! - `PAKET_FIELD_CONFIG`: config file path (default: ./field_config.toml)
//! - `PAKET_LOG_FORMAT`: set to "json" for structured log output
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paket_field::capture::IngestQueue;
use paket_field::config::watcher::{run_config_watcher, ConfigEvent};
use paket_field::config::{ConfigHandle, FieldConfig};
use paket_field::gateway::{HttpGateway, RemoteGateway, RouteFilter, SharedGateway};
use paket_field::route::{RefreshOutcome, RouteProgress, SkipReason};
use paket_field::storage::{open_store, ProcessLock, SharedStore};
use paket_field::sync::run_drain_loop;
use paket_field::types::GeoPoint;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "paket-field")]
#[command(about = "Offline-first field-operations engine for capture and driver devices")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides PAKET_FIELD_CONFIG and ./field_config.toml)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the data directory from the config
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Record a captured label and try to submit it
    Capture {
        /// Recognized label text
        #[arg(long)]
        text: String,
        /// Recognition confidence in [0, 1]
        #[arg(long)]
        confidence: f64,
        /// Latitude of the capture location
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude of the capture location
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Submit every queued observation, oldest first
    Drain,

    /// List queued observations
    Pending,

    /// List records needing follow-up
    Attention {
        /// Return a rejected record to the queue by local id
        #[arg(long, value_name = "LOCAL_ID")]
        requeue: Option<uuid::Uuid>,
    },

    /// Record counts by sync state
    Stats,

    /// Check that the remote service is reachable
    Health,

    /// Driver route commands
    #[command(subcommand)]
    Route(RouteCommand),

    /// Run the background drain scheduler until Ctrl+C
    Run,
}

#[derive(clap::Subcommand, Debug)]
enum RouteCommand {
    /// Fetch and load the route assigned to this vehicle
    Fetch {
        /// Planned date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Vehicle id (default: from config)
        #[arg(long)]
        vehicle: Option<String>,
    },
    /// Show the active route and progress
    Status,
    /// Mark the current stop completed
    Complete,
    /// Skip the current stop
    Skip {
        #[arg(long)]
        reason: String,
    },
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    DrainScheduler,
    ConfigWatcher,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::DrainScheduler => write!(f, "DrainScheduler"),
            TaskName::ConfigWatcher => write!(f, "ConfigWatcher"),
        }
    }
}

// ============================================================================
// Shared Initialization
// ============================================================================

/// Everything a command needs. The process lock lives as long as this does.
struct Runtime {
    config: ConfigHandle,
    config_path: Option<PathBuf>,
    store: SharedStore,
    gateway: SharedGateway,
    _process_lock: ProcessLock,
}

fn init_runtime(args: &CliArgs) -> Result<Runtime> {
    let (mut field_config, config_path) = FieldConfig::load_with_source(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = &args.data_dir {
        field_config.storage.data_dir = dir.clone();
    }
    field_config
        .validate()
        .context("Invalid configuration")?;

    info!(
        device = %field_config.device.device_id,
        vehicle = %field_config.device.vehicle_id,
        gateway = %field_config.gateway.base_url,
        backend = %field_config.storage.backend,
        "Configuration loaded"
    );

    let process_lock = ProcessLock::acquire(&field_config.storage.data_dir)
        .context("Failed to acquire process lock")?;

    let store = open_store(&field_config.storage).context("Failed to open durable store")?;

    let config = ConfigHandle::new(field_config);
    let gateway: SharedGateway =
        Arc::new(HttpGateway::new(config.clone()).context("Failed to build HTTP client")?);

    Ok(Runtime {
        config,
        config_path,
        store,
        gateway,
        _process_lock: process_lock,
    })
}

impl Runtime {
    fn ingest_queue(&self) -> Result<IngestQueue> {
        IngestQueue::open(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.config.clone(),
        )
        .context("Failed to open ingest queue")
    }

    fn route_progress(&self) -> Result<RouteProgress> {
        RouteProgress::open(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.config.clone(),
        )
        .context("Failed to open route progress")
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_capture(
    rt: &Runtime,
    text: &str,
    confidence: f64,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<()> {
    let location = match (lat, lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)?),
        _ => None,
    };
    let mut queue = rt.ingest_queue()?;
    let receipt = queue.capture(text, confidence, location).await?;
    print_json(&receipt)
}

async fn cmd_drain(rt: &Runtime, cancel: CancellationToken) -> Result<()> {
    let mut queue = rt.ingest_queue()?;
    let report = queue.drain_pending(&cancel).await?;
    print_json(&report)
}

fn cmd_pending(rt: &Runtime) -> Result<()> {
    let queue = rt.ingest_queue()?;
    for entry in queue.pending() {
        println!(
            "{}  {}  attempts={}  queued={}",
            entry.local_id(),
            entry.observation.package_id,
            entry.attempts,
            entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("{} pending", queue.pending_count());
    Ok(())
}

fn cmd_attention(rt: &Runtime, requeue: Option<uuid::Uuid>) -> Result<()> {
    let mut queue = rt.ingest_queue()?;

    if let Some(local_id) = requeue {
        if queue.requeue_rejected(local_id)? {
            println!("{} requeued", local_id);
        } else {
            anyhow::bail!("{} is not a rejected record", local_id);
        }
        return Ok(());
    }

    let flagged = queue.needs_attention();
    for (record, reason) in &flagged {
        println!(
            "{}  {}  conf={:.2}  {}",
            record.local_id(),
            record.observation.package_id,
            record.observation.confidence,
            reason
        );
    }
    println!("{} need attention", flagged.len());
    Ok(())
}

async fn cmd_health(rt: &Runtime) -> Result<()> {
    match rt.gateway.health().await {
        Ok(health) => print_json(&health),
        Err(e) => {
            anyhow::bail!(
                "Service at {} unreachable: {}",
                rt.config.current().gateway.base_url,
                e
            )
        }
    }
}

async fn cmd_route(rt: &Runtime, command: RouteCommand) -> Result<()> {
    let mut progress = rt.route_progress()?;

    match command {
        RouteCommand::Fetch { date, vehicle } => {
            let filter = RouteFilter {
                planned_date: date,
                vehicle_id: vehicle,
            };
            match progress.refresh(filter).await? {
                RefreshOutcome::Loaded { route_id, cursor } => {
                    println!("Loaded route {} (next stop index {})", route_id, cursor);
                }
                RefreshOutcome::NoRouteAssigned => println!("No route assigned"),
                RefreshOutcome::Unavailable(e) => {
                    warn!(error = %e, "Route service unavailable");
                    println!("Route service unavailable; keeping local route");
                }
            }
        }
        RouteCommand::Status => {}
        RouteCommand::Complete => {
            match progress.complete_current_stop().await? {
                Some(res) => print_json(&res)?,
                None => println!("Nothing to complete"),
            }
        }
        RouteCommand::Skip { reason } => {
            let reason = SkipReason::new(reason)?;
            match progress.skip_current_stop(reason).await? {
                Some(res) => print_json(&res)?,
                None => println!("Nothing to skip"),
            }
        }
    }

    match progress.route() {
        Some(route) => {
            println!(
                "Route {}  vehicle={}  status={:?}  progress={:.0}%",
                route.route_id,
                route.vehicle_id,
                route.status,
                progress.progress() * 100.0
            );
            if let Some(stop) = progress.current_stop() {
                println!(
                    "Next: #{} {} {}",
                    stop.sequence,
                    stop.package_id.as_deref().unwrap_or("(depot)"),
                    stop.address_summary.as_deref().unwrap_or("")
                );
            }
        }
        None => println!("No active route"),
    }
    Ok(())
}

// ============================================================================
// Daemon
// ============================================================================

/// Spawn the drain scheduler into the JoinSet.
fn spawn_drain_scheduler(
    task_set: &mut JoinSet<Result<TaskName>>,
    queue: Arc<Mutex<IngestQueue>>,
    config: ConfigHandle,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[DrainScheduler] Task starting");
        run_drain_loop(queue, config, cancel_token).await;
        Ok(TaskName::DrainScheduler)
    });
}

/// Spawn the config watcher and a logger for its events.
fn spawn_config_watcher(
    task_set: &mut JoinSet<Result<TaskName>>,
    path: PathBuf,
    config: ConfigHandle,
    cancel_token: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<ConfigEvent>(8);

    task_set.spawn(async move {
        info!("[ConfigWatcher] Task starting");
        run_config_watcher(path, config, tx, cancel_token).await;
        Ok(TaskName::ConfigWatcher)
    });

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ConfigEvent::Reloaded(changes) if changes.is_empty() => {
                    info!("Config file touched, no effective changes");
                }
                ConfigEvent::Reloaded(changes) => {
                    info!(changes = changes.len(), "Config hot-reloaded");
                }
                ConfigEvent::Error(e) => warn!(error = %e, "Config reload rejected"),
            }
        }
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let tasks observe cancellation and finish their current step
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }
    Ok(())
}

async fn cmd_run(rt: &Runtime, cancel_token: CancellationToken) -> Result<()> {
    let queue = Arc::new(Mutex::new(rt.ingest_queue()?));
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    spawn_drain_scheduler(
        &mut task_set,
        Arc::clone(&queue),
        rt.config.clone(),
        cancel_token.clone(),
    );

    match &rt.config_path {
        Some(path) => spawn_config_watcher(
            &mut task_set,
            path.clone(),
            rt.config.clone(),
            cancel_token.clone(),
        ),
        None => info!("No config file in use, hot reload disabled"),
    }

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("PAKET_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr so command output on stdout stays parseable
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = CliArgs::parse();
    let rt = init_runtime(&args)?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    match args.command {
        SubCommand::Capture {
            text,
            confidence,
            lat,
            lon,
        } => cmd_capture(&rt, &text, confidence, lat, lon).await,
        SubCommand::Drain => cmd_drain(&rt, cancel_token).await,
        SubCommand::Pending => cmd_pending(&rt),
        SubCommand::Attention { requeue } => cmd_attention(&rt, requeue),
        SubCommand::Stats => print_json(&rt.ingest_queue()?.stats()),
        SubCommand::Health => cmd_health(&rt).await,
        SubCommand::Route(command) => cmd_route(&rt, command).await,
        SubCommand::Run => cmd_run(&rt, cancel_token).await,
    }
}
