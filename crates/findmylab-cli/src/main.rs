use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use findmylab_revalidate::{FanoutInvalidator, HttpInvalidator, HttpInvalidatorConfig, Revalidator};
use findmylab_store::{
    apply_seed, maybe_build_scheduler, Collection, CollectionHooks, DocumentStore, MemoryStore,
    NoopHooks, PgStore, SchedulerConfig, SeedFile,
};
use findmylab_web::{AppState, PageCache, WebConfig};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "findmylab")]
#[command(about = "Find My Lab content service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the public pages and the editor API.
    Serve {
        /// Seed file applied before the server starts.
        #[arg(long, env = "FINDMYLAB_SEED_FILE")]
        seed: Option<PathBuf>,
    },
    /// Apply the database migrations.
    Migrate,
    /// Load programs and opportunities from a YAML seed file.
    Seed {
        #[arg(env = "FINDMYLAB_SEED_FILE")]
        file: PathBuf,
    },
    /// Print the Opportunities collection schema as JSON.
    Schema,
    /// Apply scheduled publish/unpublish jobs that are due now.
    PublishScheduled,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "findmylab=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { seed: None }) {
        Commands::Serve { seed } => serve(seed.as_deref()).await?,
        Commands::Migrate => {
            let url = database_url().context("migrate needs DATABASE_URL")?;
            let store = PgStore::connect(&url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Seed { file } => {
            if database_url().is_none() {
                warn!("DATABASE_URL is not set; seeding an in-memory store that exits with this command");
            }
            let collection = Collection::new(open_store().await?, Arc::new(NoopHooks));
            let summary = seed_from(&collection, &file).await?;
            println!(
                "seed complete: programs={} created={} skipped={}",
                summary.programs, summary.created, summary.skipped
            );
        }
        Commands::Schema => {
            let schema = serde_json::to_string_pretty(findmylab_core::schema::opportunities())
                .context("serializing schema")?;
            println!("{schema}");
        }
        Commands::PublishScheduled => {
            let (revalidator, worker) = Revalidator::spawn(Arc::new(revalidation_fanout(None)?));
            let collection = Collection::new(open_store().await?, Arc::new(revalidator.clone()));
            let applied = collection
                .run_scheduled(chrono::Utc::now())
                .await
                .context("running scheduled jobs")?;
            drain(&revalidator, worker).await;
            println!("scheduled jobs applied: {applied}");
        }
    }

    Ok(())
}

async fn serve(seed: Option<&Path>) -> Result<()> {
    let cache = Arc::new(PageCache::new());
    let (revalidator, worker) = Revalidator::spawn(Arc::new(revalidation_fanout(Some(cache.clone()))?));
    let hooks: Arc<dyn CollectionHooks> = Arc::new(revalidator.clone());
    let collection = Collection::new(open_store().await?, hooks);

    if let Some(path) = seed {
        let summary = seed_from(&collection, path).await?;
        info!(created = summary.created, skipped = summary.skipped, "seed applied");
    }

    let mut scheduler = maybe_build_scheduler(&SchedulerConfig::from_env(), collection.clone())
        .await
        .context("building scheduler")?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!("scheduler started");
    }

    let state = AppState::new(Arc::new(collection), cache, WebConfig::from_env());
    let served = findmylab_web::serve(state).await;

    if let Some(sched) = scheduler.as_mut() {
        if let Err(err) = sched.shutdown().await {
            warn!(error = %err, "scheduler did not shut down cleanly");
        }
    }
    drain(&revalidator, worker).await;
    served
}

/// Invalidation targets for collection writes: the in-process page cache
/// when there is one, plus the external endpoint when
/// `FINDMYLAB_REVALIDATE_URL` is set.
fn revalidation_fanout(cache: Option<Arc<PageCache>>) -> Result<FanoutInvalidator> {
    let mut fanout = FanoutInvalidator::default();
    if let Some(cache) = cache {
        fanout = fanout.with(cache);
    }
    if let Some(config) = HttpInvalidatorConfig::from_env() {
        info!(url = %config.url, "forwarding revalidations");
        fanout = fanout.with(Arc::new(HttpInvalidator::new(config)?));
    }
    Ok(fanout)
}

/// Applies every invalidation queued so far, then stops the worker.
async fn drain(revalidator: &Revalidator, worker: JoinHandle<()>) {
    revalidator.flush().await;
    worker.abort();
    info!("revalidation queue drained");
}

async fn seed_from(collection: &Collection, path: &Path) -> Result<findmylab_store::SeedSummary> {
    let seed = SeedFile::load(path).await?;
    apply_seed(collection, seed).await
}

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Postgres when `DATABASE_URL` is set (migrated on open), otherwise an
/// in-memory store.
async fn open_store() -> Result<Arc<dyn DocumentStore>> {
    match database_url() {
        Some(url) => {
            let store = PgStore::connect(&url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
