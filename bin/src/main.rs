//! Uptime Keeper — entry point
//!
//! A process that can be invoked once per tick by an external scheduler
//! (`tick <pool>`), serve the status read surface (`serve`), or run its own
//! slot-aligned loop over every supported pool when no external cron is
//! available (`daemon`).

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use uptimekeeper_adapters::registry::AdapterRegistry;
use uptimekeeper_engine::ReconciliationEngine;
use uptimekeeper_kv::RedisKvStore;
use uptimekeeper_persistence::PgPersistenceAdapter;
use uptimekeeper_status::StatusReadService;

mod config;
use config::Config;

#[derive(Parser)]
#[clap(name = "uptimekeeper")]
#[clap(about = "Uptime and status aggregator for cryptocurrency mining workers")]
struct Cli {
    /// Verbosity level (0-5)
    #[clap(short, long, default_value = "2")]
    verbosity: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass for a single pool.
    Tick {
        #[clap(value_name = "POOL")]
        pool: String,
    },
    /// Serve the status read surface.
    Serve,
    /// Run a slot-aligned internal loop calling `tick` for every supported pool.
    Daemon,
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let config = Config::from_env();

    match cli.command {
        Commands::Tick { pool } => run_tick(&config, &pool).await,
        Commands::Serve => run_serve(&config).await,
        Commands::Daemon => run_daemon(&config).await,
    }
}

async fn build_engine(config: &Config) -> ReconciliationEngine {
    let persistence = match PgPersistenceAdapter::connect(&config.database_url, &config.db).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("failed to connect to database: {e}");
            process::exit(1);
        }
    };
    let kv = match RedisKvStore::connect(&config.kv_url).await {
        Ok(k) => Arc::new(k),
        Err(e) => {
            error!("failed to connect to kv store: {e}");
            process::exit(1);
        }
    };
    ReconciliationEngine::new(
        AdapterRegistry::new(config.binance_base.clone()),
        persistence,
        kv,
    )
}

async fn run_tick(config: &Config, pool: &str) {
    let engine = build_engine(config).await;
    match engine.tick(pool).await {
        Ok(report) => info!("tick complete for {pool}: {report:?}"),
        Err(e) => error!("tick failed for {pool}: {e}"),
    }
}

async fn run_serve(config: &Config) {
    let persistence = match PgPersistenceAdapter::connect(&config.database_url, &config.db).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("failed to connect to database: {e}");
            process::exit(1);
        }
    };
    let registry = Arc::new(AdapterRegistry::new(config.binance_base.clone()));
    let service = Arc::new(StatusReadService::with_concurrency(
        persistence,
        registry,
        config.status_concurrency,
    ));
    let app = uptimekeeper_status::router(service);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.status_port));
    info!("status read service listening on {addr}");
    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        error!("status server error: {e}");
        process::exit(1);
    }
}

async fn run_daemon(config: &Config) {
    let engine = build_engine(config).await;
    let registry = AdapterRegistry::new(config.binance_base.clone());
    let pools = registry.supported_pools();
    info!("daemon loop starting for pools: {pools:?}");

    loop {
        for pool in &pools {
            match engine.tick(pool).await {
                Ok(report) => info!("tick complete for {pool}: {report:?}"),
                Err(e) => error!("tick failed for {pool}: {e}"),
            }
        }

        let now = chrono::Utc::now();
        let slot_minutes = uptimekeeper_core::slot::SLOT_MINUTES;
        let elapsed_in_slot = now.timestamp() % (slot_minutes * 60);
        let sleep_secs = (slot_minutes * 60 - elapsed_in_slot).max(1) as u64;
        tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
    }
}
