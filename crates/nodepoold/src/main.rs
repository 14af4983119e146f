//! nodepoold — the capacity reconciler daemon.
//!
//! Single binary that assembles the reconciler subsystems:
//! - Configuration (`nodepool.toml`)
//! - Checkpoint store (redb)
//! - Sample registry + reconciler metrics
//! - One `PoolReconciler` task per pool
//! - REST API + Prometheus endpoint
//!
//! # Usage
//!
//! ```text
//! nodepoold run --config nodepool.toml --data-dir /var/lib/nodepool --port 8480
//! nodepoold validate --config nodepool.toml
//! ```

mod executors;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nodepool_api::{ApiState, build_router};
use nodepool_core::{ExecutorSettings, NodepoolConfig, Settings};
use nodepool_metrics::{ReconcilerMetrics, SampleRegistry};
use nodepool_reconcile::{Clock, PoolReconciler, SystemClock};
use nodepool_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,nodepoold=debug,nodepool=debug";

#[derive(Parser)]
#[command(name = "nodepoold", about = "Capacity reconciler for worker node pools")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler for every configured pool.
    Run {
        /// Path to nodepool.toml.
        #[arg(long, default_value = "nodepool.toml")]
        config: PathBuf,

        /// Data directory for checkpoints and scale history.
        #[arg(long, default_value = "/var/lib/nodepool")]
        data_dir: PathBuf,

        /// Port for the REST API.
        #[arg(long, default_value = "8480")]
        port: u16,
    },
    /// Parse and validate a configuration file, then exit.
    Validate {
        /// Path to nodepool.toml.
        #[arg(long, default_value = "nodepool.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            port,
        } => run(&config, &data_dir, port).await,
        Command::Validate { config } => validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_settings(config: &Path) -> anyhow::Result<Settings> {
    NodepoolConfig::load(config).with_context(|| format!("invalid config {}", config.display()))
}

fn validate(config: &Path) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let tuning = &settings.tuning;

    println!("✓ {} is valid", config.display());
    println!(
        "  tick {:?}, staleness {:?}, margin {}, failure threshold {}, backoff cap x{}, executor timeout {:?}",
        tuning.tick_interval,
        tuning.staleness_threshold,
        tuning.hysteresis_margin,
        tuning.failure_threshold,
        tuning.backoff_cap_multiplier,
        tuning.executor_timeout,
    );
    match &settings.executor {
        ExecutorSettings::Simulated => println!("  executor: simulated"),
        ExecutorSettings::Command { apply, observe } => {
            println!("  executor: command");
            println!("    apply:   {apply}");
            if let Some(observe) = observe {
                println!("    observe: {observe}");
            }
        }
    }
    for pool in &settings.pools {
        println!(
            "  pool {:<16} size {}..={} (desired {}), target {:.2}, cooldown up {}s / down {}s",
            pool.id,
            pool.min_size,
            pool.max_size,
            pool.desired_size,
            pool.target_utilization,
            pool.scale_up_cooldown_secs,
            pool.scale_down_cooldown_secs,
        );
    }
    Ok(())
}

async fn run(config: &Path, data_dir: &Path, port: u16) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    info!(
        config = %config.display(),
        pools = settings.pools.len(),
        "nodepool daemon starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = data_dir.join("nodepool.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let samples = SampleRegistry::new();
    let metrics = ReconcilerMetrics::new();
    for pool in &settings.pools {
        samples.register(&pool.id).await;
        metrics.register(&pool.id).await;
    }

    let executor = executors::build(&settings.executor);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start pool reconcilers ─────────────────────────────────

    let mut handles = Vec::with_capacity(settings.pools.len());
    for spec in &settings.pools {
        let mut reconciler = PoolReconciler::new(
            spec.clone(),
            settings.tuning.clone(),
            clock.clone(),
            Arc::new(samples.clone()),
            executor.clone(),
        )
        .with_store(store.clone())
        .with_metrics(metrics.clone());

        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            reconciler.restore().await;
            reconciler.run(shutdown).await;
        }));
    }

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        pools: Arc::new(settings.pools),
        samples,
        metrics,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!("nodepool daemon stopped");
    Ok(())
}
