//! MPI matching worker.
//!
//! Claims matching jobs from the database queue, scores each resource
//! against its candidates and rewrites the duplicate links around it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpi_core::defaults;
use mpi_db::{log_pool_metrics, Database, PoolConfig, QueueConfig};
use mpi_jobs::{MatchQueue, MatchingJobHandler, PollingFeed, WorkerConfig, WorkerPool};
use mpi_matching::MatchingRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "mpi_worker=info,mpi_jobs=info,mpi_matching=info,mpi_db=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("mpi-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string());
    let config_path = PathBuf::from(
        std::env::var("MATCHING_CONFIG_PATH")
            .unwrap_or_else(|_| defaults::MATCHING_CONFIG_PATH.to_string()),
    );
    let max_results = std::env::var("MPI_MAX_RESULTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(defaults::MATCH_MAX_RESULTS);
    let run_migrations = std::env::var("MPI_RUN_MIGRATIONS")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    let worker_config = WorkerConfig::from_env();

    // Load matching configuration before touching the database so a missing
    // file fails fast.
    let registry = Arc::new(MatchingRegistry::load(&config_path)?);
    info!(
        path = %config_path.display(),
        resource_types = ?registry.resource_types().collect::<Vec<_>>(),
        accumulation = ?registry.accumulation(),
        "Matching configuration ready"
    );

    // Connect to database
    let pool_config = PoolConfig::from_env(worker_config.worker_count);
    let db = Database::connect(&database_url, &pool_config, QueueConfig::from_env()).await?;
    if run_migrations {
        db.migrate().await?;
        info!("Database migrations applied");
    }
    log_pool_metrics(db.pool());

    let pool = db.pool.clone();
    let Database {
        queue, resources, ..
    } = db;
    let queue: Arc<dyn MatchQueue> = Arc::new(queue);

    let stats = queue.stats().await?;
    info!(
        visible = stats.visible,
        in_flight = stats.in_flight,
        "Matching queue depth at startup"
    );

    let feed = Arc::new(PollingFeed::new(queue, worker_config.poll_interval()));
    let handler = Arc::new(
        MatchingJobHandler::new(Arc::new(resources), registry).with_max_results(max_results),
    );
    let handle = WorkerPool::new(feed, handler, worker_config).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    pool.close().await;
    info!("mpi-worker stopped");
    Ok(())
}
