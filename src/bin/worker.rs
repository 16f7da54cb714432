//! Main binary entry point for the trunkline worker pool.
//!
//! Runs the configured number of workers plus the maintenance tasks: the
//! orphaned-event sweep, stale-claim release, and terminal-job pruning.

use clap::{Arg, Command};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trunkline::{
    Config, OrphanSweeper, Result, TrunklineError, Worker, WorkerPool,
    config::mask_database_url,
    handlers::call_handlers,
    queue::{JobQueue, PostgresQueue},
    store::PostgresStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trunkline-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Worker pool processing queued webhook events")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Database connection URL"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("Number of workers in the pool"),
        )
        .get_matches();

    let mut config = Config::load(matches.get_one::<String>("config").map(String::as_str))?;

    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database.url = url.clone();
    }
    if let Some(count) = matches.get_one::<String>("workers") {
        config.worker.count = count
            .parse()
            .map_err(|e| TrunklineError::Config(format!("invalid worker count {}: {}", count, e)))?;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level.0)),
        )
        .init();

    info!("Starting trunkline worker pool");
    info!("Database: {}", mask_database_url(&config.database.url));
    info!("Workers: {}", config.worker.count);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(config.database.connect_timeout)
        .connect(&config.database.url)
        .await?;

    if config.database.create_tables {
        trunkline::migrations::create_tables(&pool).await?;
        info!("Database tables ready");
    }

    let store = Arc::new(PostgresStore::new(pool.clone()));
    let queue = Arc::new(PostgresQueue::new(pool).with_retry_policy(config.retry_policy()));
    let registry = Arc::new(call_handlers(Arc::clone(&store)));

    let mut workers = WorkerPool::new();
    for i in 0..config.worker.count {
        workers.add_worker(
            Worker::new(Arc::clone(&queue), Arc::clone(&store), Arc::clone(&registry))
                .with_name(format!("worker-{}", i + 1))
                .with_poll_interval(config.worker.poll_interval),
        );
    }

    let sweeper = OrphanSweeper::new(Arc::clone(&queue), Arc::clone(&store))
        .with_min_age(config.orphan_age())
        .with_interval(config.sweep.interval)
        .with_batch_size(config.sweep.batch_size);
    let (sweep_tx, sweep_rx) = mpsc::channel(1);
    let sweep_handle = tokio::spawn(async move { sweeper.run(sweep_rx).await });

    let (maintenance_tx, mut maintenance_rx) = mpsc::channel::<()>(1);
    let maintenance_queue = Arc::clone(&queue);
    let stale_age = config.stale_age();
    let retention = config.retention_policy();
    let mut stale_tick = tokio::time::interval(config.worker.stale_check_interval);
    let mut prune_tick = tokio::time::interval(config.retention.prune_interval);
    let maintenance_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = maintenance_rx.recv() => {
                    info!("Maintenance tasks shutting down");
                    break;
                }
                _ = stale_tick.tick() => {
                    match maintenance_queue.release_stale_jobs(stale_age).await {
                        Ok(0) => {}
                        Ok(n) => warn!("Released {} stale job claim(s)", n),
                        Err(e) => error!("Stale claim release failed: {}", e),
                    }
                }
                _ = prune_tick.tick() => {
                    match maintenance_queue.prune(&retention).await {
                        Ok(0) => {}
                        Ok(n) => info!("Pruned {} terminal job(s)", n),
                        Err(e) => error!("Retention prune failed: {}", e),
                    }
                }
            }
        }
    });

    workers.start();
    info!("Worker pool running; press ctrl-c to drain");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining workers");

    let _ = sweep_tx.send(()).await;
    let _ = maintenance_tx.send(()).await;
    workers.shutdown().await?;

    sweep_handle.await.map_err(|e| TrunklineError::Worker {
        message: format!("Sweep task failed: {}", e),
    })?;
    maintenance_handle.await.map_err(|e| TrunklineError::Worker {
        message: format!("Maintenance task failed: {}", e),
    })?;

    info!("Worker pool stopped");
    Ok(())
}
