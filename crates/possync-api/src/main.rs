//! possync Server Binary
//!
//! Idempotent batch synchronization server for POS terminals.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! possync --config config.yaml
//!
//! # With environment variables only
//! POSSYNC_STORAGE__BACKEND=memory possync
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, Level};

use possync_api::http::{create_router_with_options, AppState, RouterOptions};
use possync_api::observability::{init_logging, init_metrics, LoggingConfig, MetricsState};
use possync_server::{
    spawn_pruner, ActivityTracker, RetentionConfig, SchemaRegistry, ServerConfig, TokioJobQueue,
    WorkerPool, WorkerPoolConfig,
};
use possync_storage::{MemorySyncStore, PostgresConfig, PostgresSyncStore, SyncStore};

/// possync - Idempotent batch synchronization server for POS terminals
#[derive(Parser, Debug)]
#[command(name = "possync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        ServerConfig::load(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    init_logging(LoggingConfig {
        json_format: config.logging.json_format,
        default_level: parse_log_level(&config.logging.level),
    });

    info!(version = env!("CARGO_PKG_VERSION"), "Starting possync server");

    let metrics_state = if config.metrics.enabled {
        let state = init_metrics()?;
        info!("Metrics enabled at /metrics");
        Some(state)
    } else {
        None
    };

    // Create the storage backend based on configuration
    match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage backend");
            let store = MemorySyncStore::new_shared();
            run_server(store, &config, metrics_state).await
        }
        "postgres" => {
            let database_url = config.storage.database_url.clone().ok_or_else(|| {
                anyhow::anyhow!("storage.database_url is required for the postgres backend")
            })?;

            info!("Connecting to PostgreSQL database");
            let pg_config = PostgresConfig {
                database_url,
                max_connections: config.storage.max_connections,
                min_connections: config.storage.min_connections,
                connect_timeout_secs: config.storage.connect_timeout_secs,
                query_timeout_secs: config.storage.query_timeout_secs,
            };

            let store = PostgresSyncStore::from_config(&pg_config).await?;
            info!("PostgreSQL connection established");

            run_server(Arc::new(store), &config, metrics_state).await
        }
        other => {
            anyhow::bail!("Unknown storage backend: {other}");
        }
    }
}

/// Runs the HTTP server and its background tasks until a shutdown signal.
///
/// Shutdown order: stop accepting connections and drain the in-flight ones,
/// then stop the workers, the activity flusher and the pruner. The flusher
/// writes its remaining samples on the way out.
async fn run_server<S: SyncStore>(
    store: Arc<S>,
    config: &ServerConfig,
    metrics_state: Option<MetricsState>,
) -> anyhow::Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let queue = TokioJobQueue::new_shared(config.queue.capacity);
    let registry =
        SchemaRegistry::new_shared(config.schemas.dir.clone(), config.schemas.strict_tables);
    let tracker = ActivityTracker::new_shared();

    let workers = WorkerPool::spawn(
        WorkerPoolConfig {
            workers: config.queue.workers,
            max_attempts: config.queue.max_attempts,
        },
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&registry),
        &shutdown_tx,
    );

    let flusher = tracker.spawn_flusher(
        Arc::clone(&store),
        Duration::from_secs(config.activity.flush_interval_secs),
        &shutdown_tx,
    );

    let pruner = if config.ledger.prune_enabled {
        info!(
            retention_days = config.ledger.retention_days,
            "Ledger pruning enabled"
        );
        Some(spawn_pruner(
            Arc::clone(&store),
            Arc::clone(&registry),
            RetentionConfig {
                retention_days: config.ledger.retention_days,
                prune_interval: Duration::from_secs(config.ledger.prune_interval_secs),
            },
            &shutdown_tx,
        ))
    } else {
        None
    };

    let state = AppState::new(store, queue, registry, tracker);
    let options = RouterOptions {
        body_limit_bytes: config.server.body_limit_bytes,
        auth_enabled: config.auth.enabled,
        cors_enabled: config.server.cors_enabled,
    };
    let router = create_router_with_options(state, options, metrics_state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let mut shutdown_rx = shutdown_tx.subscribe();
    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Shutdown signal received, stopping server");
                    let _ = signal_tx.send(());
                }
                _ = shutdown_rx.recv() => {}
            }
        })
        .await?;

    // Connections are drained; stop the background tasks.
    let _ = shutdown_tx.send(());
    workers.join().await;
    let _ = flusher.await;
    if let Some(pruner) = pruner {
        let _ = pruner.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Parse log level from string.
fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
