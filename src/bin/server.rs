//! Main binary entry point for the trunkline webhook server.

use clap::{Arg, Command};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trunkline::{
    Config, Result, TrunklineError,
    config::mask_database_url,
    queue::PostgresQueue,
    server,
    store::PostgresStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trunkline-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Webhook ingestion server for the trunkline pipeline")
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
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Server bind address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port"),
        )
        .get_matches();

    let mut config = Config::load(matches.get_one::<String>("config").map(String::as_str))?;

    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database.url = url.clone();
    }
    if let Some(bind) = matches.get_one::<String>("bind") {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port
            .parse()
            .map_err(|e| TrunklineError::Config(format!("invalid port {}: {}", port, e)))?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level.0)),
        )
        .init();

    info!("Starting trunkline webhook server");
    info!("Server: http://{}", config.server.bind_addr());
    info!("Database: {}", mask_database_url(&config.database.url));

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

    // Keep answering in-flight deliveries for a moment after the signal so
    // upstream load balancers see the drain.
    let grace = config.server.shutdown_grace;
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        tokio::time::sleep(grace).await;
    };

    server::run_server(store, queue, config.socket_addr()?, shutdown).await
}
