//! # Appliance Pilot CLI (`apilot`)
//!
//! ## Usage
//!
//! ```bash
//! apilot --config ./config/apilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `apilot init` | Create the SQLite database and run schema migrations |
//! | `apilot serve` | Start the HTTP API and the ingestion worker pool |
//! | `apilot recipe add` | Insert a recipe for adaptation testing |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! apilot init --config ./config/apilot.toml
//!
//! # Start the server
//! apilot serve --config ./config/apilot.toml
//!
//! # Seed a recipe
//! apilot recipe add --owner u1 --title "Roast Chicken" \
//!     --step "Preheat oven to 220C" --step "Roast 50 min"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use appliance_pilot::adapt::AdaptationEngine;
use appliance_pilot::chunker::ChunkOptions;
use appliance_pilot::extract::PdfTextParser;
use appliance_pilot::indexer::ChunkIndexer;
use appliance_pilot::ingest::IngestionCoordinator;
use appliance_pilot::jobs::JobQueue;
use appliance_pilot::llm::{create_embedding_client, create_generation_client};
use appliance_pilot::models::Recipe;
use appliance_pilot::object_store::FsObjectStore;
use appliance_pilot::resolver::TextSourceResolver;
use appliance_pilot::server::{run_server, AppState};
use appliance_pilot::store::ApplianceStore;
use appliance_pilot::vector::SqliteVectorIndex;
use appliance_pilot::{config, db, migrate};

/// Appliance Pilot — appliance manual ingestion and recipe adaptation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/apilot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "apilot",
    about = "Appliance Pilot — appliance manual ingestion and recipe adaptation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/apilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (appliances, recipes, manual_vectors). Idempotent.
    Init,

    /// Start the HTTP server and the ingestion worker pool.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// appliance and recipe-adaptation endpoints.
    Serve,

    /// Manage recipes used by the adaptation endpoint.
    Recipe {
        #[command(subcommand)]
        action: RecipeAction,
    },
}

/// Recipe management subcommands.
#[derive(Subcommand)]
enum RecipeAction {
    /// Insert (or replace) a recipe.
    ///
    /// Recipe CRUD proper lives in the main application; this exists to
    /// exercise adaptation against a local database.
    Add {
        /// Owner the recipe belongs to.
        #[arg(long)]
        owner: String,
        /// Recipe id; generated when omitted.
        #[arg(long)]
        id: Option<String>,
        /// Recipe title.
        #[arg(long)]
        title: String,
        /// Ordered steps; repeat the flag once per step.
        #[arg(long = "step", required = true)]
        steps: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let store = Arc::new(ApplianceStore::new(pool.clone()));
            let objects: Arc<dyn appliance_pilot::object_store::ObjectStore> =
                Arc::new(FsObjectStore::new(&config.storage.root));
            let index: Arc<dyn appliance_pilot::vector::VectorIndex> =
                Arc::new(SqliteVectorIndex::new(pool.clone()));
            let embedding: Arc<dyn appliance_pilot::llm::EmbeddingClient> =
                Arc::from(create_embedding_client(&config.embedding)?);
            let generation: Arc<dyn appliance_pilot::llm::GenerationClient> =
                Arc::from(create_generation_client(&config.generation)?);

            let resolver = TextSourceResolver::new(
                objects.clone(),
                Arc::new(PdfTextParser),
                generation.clone(),
                config.extraction.min_local_chars,
            )?;
            let indexer = ChunkIndexer::new(
                embedding.clone(),
                index.clone(),
                config.retrieval.excerpt_chars,
            );
            let coordinator = Arc::new(IngestionCoordinator::new(
                store.clone(),
                objects.clone(),
                resolver,
                indexer,
                generation.clone(),
                ChunkOptions::from(&config.chunking),
            ));
            let queue = JobQueue::start(coordinator, config.jobs.workers, config.jobs.queue_depth);

            let adaptation = Arc::new(AdaptationEngine::new(
                store.clone(),
                objects.clone(),
                index.clone(),
                embedding,
                generation,
                config.retrieval.clone(),
            ));

            let state = AppState {
                store,
                objects,
                index,
                queue,
                adaptation,
            };
            run_server(state, &config.server.bind).await?;
        }
        Commands::Recipe {
            action:
                RecipeAction::Add {
                    owner,
                    id,
                    title,
                    steps,
                },
        } => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let store = ApplianceStore::new(pool);
            let recipe = Recipe {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                owner_id: owner,
                title,
                steps,
            };
            store.insert_recipe(&recipe).await?;
            println!("Recipe stored: {}", recipe.id);
        }
    }

    Ok(())
}
