//! # mailvec CLI
//!
//! The `mailvec` binary drives the ingestion pipeline: database and
//! collection initialization, per-owner incremental sync, owner-scoped
//! search, and cursor inspection.
//!
//! ## Usage
//!
//! ```bash
//! mailvec --config ./config/mailvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mailvec init` | Create the cursor database and the vector collection |
//! | `mailvec sync --owner <id>` | Incrementally ingest new mail for an owner |
//! | `mailvec search --owner <id> "<query>"` | Semantic search over an owner's mail |
//! | `mailvec cursor --owner <id>` | Print the stored sync cursor |
//!
//! ## Environment Variables
//!
//! - `MAILVEC_MAIL_TOKEN` — bearer token for the mail API
//! - `OPENAI_API_KEY` — required when `embedding.provider = "openai"`

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mailvec::backoff::Backoff;
use mailvec::config::{load_config, Config};
use mailvec::db;
use mailvec::embedding::{create_embedder, Embedder};
use mailvec::mail::{HttpMailTransport, MailFetcher};
use mailvec::search::{format_hit, search_documents};
use mailvec::sync::{get_cursor, SyncEngine};
use mailvec::vector_store::{QdrantStore, VectorStore};

/// mailvec — owner-partitioned mailbox ingestion and semantic retrieval.
#[derive(Parser)]
#[command(
    name = "mailvec",
    about = "mailvec — owner-partitioned mailbox ingestion and semantic retrieval",
    version,
    long_about = "mailvec incrementally syncs mailboxes into an owner-partitioned vector \
    index: messages are fetched through a retrying mail API client, parsed out of their MIME \
    transport format, cleaned, embedded, and upserted. Searches are always scoped to one owner."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailvec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the cursor database and the vector collection.
    ///
    /// Creates the SQLite cursor table and the vector collection with its
    /// owner payload index. Idempotent — running it multiple times is safe.
    Init,

    /// Incrementally sync new mail for one owner.
    ///
    /// Fetches messages newer than the stored cursor, ingests them into
    /// the vector collection, and advances the cursor.
    Sync {
        /// Owner whose mailbox to sync.
        #[arg(long)]
        owner: i64,

        /// Ignore the stored cursor — re-ingest from the beginning of time.
        #[arg(long)]
        full: bool,

        /// Override the per-run cap on fetched messages.
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Semantic search over one owner's ingested mail.
    Search {
        /// The search query.
        query: String,

        /// Owner whose partition to search.
        #[arg(long)]
        owner: i64,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the stored sync cursor for one owner.
    Cursor {
        /// Owner to inspect.
        #[arg(long)]
        owner: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailvec=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Sync {
            owner,
            full,
            max_results,
        } => run_sync(&config, owner, full, max_results).await,
        Commands::Search {
            query,
            owner,
            limit,
        } => run_search(&config, owner, &query, limit).await,
        Commands::Cursor { owner } => run_cursor(&config, owner).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    db::run_migrations(&pool).await?;

    let store = QdrantStore::new(&config.vector.url, &config.vector.distance);
    store
        .ensure_collection(&config.vector.collection, config.embedding.dims)
        .await?;

    pool.close().await;
    println!(
        "initialized: db={} collection={}",
        config.db.path.display(),
        config.vector.collection
    );
    Ok(())
}

async fn run_sync(
    config: &Config,
    owner: i64,
    full: bool,
    max_results: Option<usize>,
) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    db::run_migrations(&pool).await?;

    let backoff = Backoff::new(config.backoff.max_retries);
    let transport = Arc::new(HttpMailTransport::new(&config.mail.api_base)?);
    let fetcher = MailFetcher::new(transport, backoff, config.mail.page_size);
    let embedder = create_embedder(&config.embedding, backoff)?;
    let store: Arc<dyn VectorStore> =
        Arc::new(QdrantStore::new(&config.vector.url, &config.vector.distance));
    store
        .ensure_collection(&config.vector.collection, config.embedding.dims)
        .await?;

    let engine = SyncEngine::new(
        fetcher,
        embedder,
        store,
        pool.clone(),
        config.vector.collection.clone(),
        max_results.unwrap_or(config.mail.max_results),
    );

    let new_cursor = if full {
        engine.sync_from(owner, 0).await?
    } else {
        engine.sync(owner).await?
    };

    pool.close().await;
    println!("sync owner {}", owner);
    println!("  cursor: {}", new_cursor);
    println!("ok");
    Ok(())
}

async fn run_search(config: &Config, owner: i64, query: &str, limit: usize) -> Result<()> {
    let backoff = Backoff::new(config.backoff.max_retries);
    let embedder: Arc<dyn Embedder> = create_embedder(&config.embedding, backoff)?;
    let store: Arc<dyn VectorStore> =
        Arc::new(QdrantStore::new(&config.vector.url, &config.vector.distance));

    let hits = search_documents(
        &embedder,
        &store,
        &config.vector.collection,
        owner,
        query,
        limit,
    )
    .await?;

    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for hit in &hits {
        println!("{}", format_hit(hit));
    }
    Ok(())
}

async fn run_cursor(config: &Config, owner: i64) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    db::run_migrations(&pool).await?;
    let cursor = get_cursor(&pool, owner).await?;
    pool.close().await;

    if cursor == 0 {
        println!("owner {}: never synced", owner);
    } else {
        println!("owner {}: last synced at {}", owner, cursor);
    }
    Ok(())
}
