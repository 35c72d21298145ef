use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use mean_feeder::feed::{FetchClient, Registry};
use mean_feeder::storage::{Database, DatabaseError};
use mean_feeder::store::{EntryStore, QueryService};
use mean_feeder::web::{self, AppState};
use mean_feeder::{Config, Scheduler};

#[derive(Parser, Debug)]
#[command(
    name = "mean-feeder",
    version,
    about = "Self-hosted RSS/Atom aggregator with a paginated JSON API"
)]
struct Args {
    /// TOML config file (environment variables override its values)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run a single refresh cycle, save state and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    tracing::debug!(?config, "Effective configuration");

    let registry = Arc::new(
        Registry::load(config.feeds_file.as_deref(), config.noisy_feeds_file.as_deref())
            .context("Failed to load feed lists")?,
    );
    if registry.is_empty() {
        tracing::warn!("No feeds configured; set FEEDS_FILE and/or NOISY_FEEDS_FILE");
    }

    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "Failed to create state directory '{}'",
            config.state_dir.display()
        )
    })?;
    let db_path = config.database_path();
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!(
                "Database '{}' is locked by another process",
                db_path.display()
            );
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let snapshot = db
        .load_snapshot()
        .await
        .context("Failed to load saved state")?;
    let store = Arc::new(EntryStore::restore(&registry, snapshot));

    let client = FetchClient::new(config.fetch_timeout()).context("Failed to build HTTP client")?;
    let scheduler = Arc::new(
        Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            client,
            config.scheduler(),
        )
        .with_database(db.clone()),
    );

    if args.once {
        if let Some(report) = scheduler.run_cycle().await {
            println!(
                "Refreshed {} feeds: {} new, {} updated, {} failed",
                report.feeds, report.new_entries, report.updated_entries, report.failed
            );
        }
        return Ok(());
    }

    let query = QueryService::new(Arc::clone(&store))
        .with_page_sizes(config.page_size, config.max_page_size);
    let state = Arc::new(AppState::new(query).with_scheduler(Arc::clone(&scheduler)));
    let addr = config.listen_addr()?;

    let handle = Arc::clone(&scheduler).spawn();
    let served = web::serve(addr, state, shutdown_signal()).await;

    if let Err(e) = handle.stop().await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }
    db.save_snapshot(&store.snapshot())
        .await
        .context("Failed to save final state")?;
    tracing::info!("Saved state, exiting");

    served.with_context(|| format!("HTTP server on {addr} failed"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
