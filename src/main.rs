use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use pharmagator::config::DatabaseConfig;
use pharmagator::logging::{init_tracing, DEFAULT_FILTER};
use pharmagator::providers::build_providers;
use pharmagator::util::db::Db;
use pharmagator::util::env as env_util;
use pharmagator::{
    AppConfig, CatalogStore, MemoryCatalogStore, PgCatalogStore, ReconciliationEngine, Scheduler,
};

#[derive(Parser)]
#[command(
    name = "pharmagator",
    version,
    about = "Aggregate pharmacy prices into a unified medicine catalog"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run ingestion on a fixed delay until Ctrl-C
    Run {
        /// Reconcile into an in-process catalog instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
    /// Run a single ingestion cycle and print its report
    Once {
        #[arg(long)]
        in_memory: bool,
    },
    /// Apply pending SQL migrations
    Migrate {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

async fn build_store(cfg: &AppConfig, in_memory: bool) -> Result<Arc<dyn CatalogStore>> {
    if in_memory {
        warn!("using in-memory catalog; nothing will be persisted");
        return Ok(Arc::new(MemoryCatalogStore::new()));
    }
    env_util::preflight_check("catalog store", &["DATABASE_URL"], &["AUTO_MIGRATE"])?;
    let db = Db::connect(&DatabaseConfig::from_env()?).await?;
    let store = PgCatalogStore::new(db);
    for pharmacy in cfg.pharmacies() {
        store
            .ensure_pharmacy(&pharmacy)
            .await
            .with_context(|| format!("registering pharmacy {}", pharmacy.id))?;
    }
    Ok(Arc::new(store))
}

async fn build_engine(cfg: &AppConfig, in_memory: bool) -> Result<ReconciliationEngine> {
    let store = build_store(cfg, in_memory).await?;
    let providers = build_providers(cfg)?;
    if providers.is_empty() {
        warn!("no providers enabled; cycles will be empty");
    }
    Ok(ReconciliationEngine::new(
        providers,
        store,
        cfg.ingest.provider_timeout,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();
    info!(profile = %cfg.profile, "pharmagator starting");

    match cli.command {
        Command::Run { in_memory } => {
            let engine = Arc::new(build_engine(&cfg, in_memory).await?);
            let handle = Scheduler::new(engine, cfg.scheduler.clone()).start();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            if let Some(handle) = handle {
                handle.stop().await?;
            }
        }
        Command::Once { in_memory } => {
            let engine = build_engine(&cfg, in_memory).await?;
            let report = engine.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Migrate { dir } => {
            let mut db_cfg = DatabaseConfig::from_env()?;
            db_cfg.auto_migrate = false;
            let db = Db::connect(&db_cfg).await?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&db_cfg.migrations_dir));
            db.run_migrations(&dir).await?;
        }
    }
    Ok(())
}
