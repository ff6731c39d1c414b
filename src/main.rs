use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use vaultsearch::config::Config;
use vaultsearch::embedding::ollama::OllamaEmbeddingProvider;
use vaultsearch::embedding::openai::OpenAIEmbeddingProvider;
use vaultsearch::embedding::{DisabledProvider, EmbeddingProvider};
use vaultsearch::logging;
use vaultsearch::store::postgres::PostgresDocumentStore;
use vaultsearch::store::{DocType, DocumentStore};
use vaultsearch::vault;
use vaultsearch::VaultSearch;

#[derive(Parser)]
#[command(name = "vaultsearch", version, about = "Keyword, semantic and hybrid search over a note vault")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Skip automatic database migration on startup
    #[arg(long, global = true)]
    skip_migrate: bool,

    /// More log output (-v debug for vaultsearch, -vv trace everything)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Load pages/ and journals/ from a vault directory
    Ingest {
        /// Vault root directory
        path: PathBuf,
    },
    /// Full-text search; every word must match
    Search(QueryArgs),
    /// Full-text search with "phrases", +required and -excluded terms
    Advanced(QueryArgs),
    /// Embedding similarity search
    Semantic(QueryArgs),
    /// Weighted blend of full-text and semantic search
    Hybrid {
        #[command(flatten)]
        query: QueryArgs,
        /// Keyword weight (default from config)
        #[arg(long)]
        fts_weight: Option<f64>,
        /// Semantic weight (default from config)
        #[arg(long)]
        semantic_weight: Option<f64>,
    },
    /// Print one document by id (e.g. "pages/Rust.md")
    Get { id: String },
    /// Count documents by type
    Count,
    /// Embedding management operations
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    query: String,
    #[arg(long, short = 'n', default_value_t = 10)]
    limit: usize,
    /// Restrict to "page" or "journal"
    #[arg(long = "type")]
    doc_type: Option<DocType>,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed every document that has no vector yet
    Backfill {
        /// Documents per batch (default from config)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show embedding statistics (counts by status and model)
    Stats,
    /// Drop all embeddings so the configured model recomputes them
    SwitchModel {
        /// Show what would happen without making changes
        #[arg(long)]
        dry_run: bool,
    },
}

/// Create the embedding provider based on configuration.
fn create_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_secs(config.embedding.timeout_secs);
    match config.embedding.provider.as_str() {
        "openai" => {
            let api_key = config.embedding.openai_api_key.clone()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when provider is 'openai'. \
                     Set VAULTSEARCH_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in vaultsearch.toml"
                ))?;
            Ok(Arc::new(OpenAIEmbeddingProvider::new(
                api_key,
                config.embedding.openai_model.clone(),
                timeout,
            )?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbeddingProvider::new(
            config.embedding.ollama_base_url.clone(),
            config.embedding.ollama_model.clone(),
            timeout,
        )?)),
        other => Err(anyhow::anyhow!(
            "Unknown embedding provider '{}' (expected 'ollama' or 'openai')",
            other
        )),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the search facade for commands that need the embedding provider.
fn build_service(
    config: &Config,
    store: Arc<PostgresDocumentStore>,
) -> Result<(VaultSearch, Arc<dyn EmbeddingProvider>)> {
    let provider = create_embedding_provider(config)?;
    Ok((VaultSearch::new(store, provider.clone(), config), provider))
}

/// Build the search facade for keyword-only commands; no provider is configured.
fn keyword_service(config: &Config, store: Arc<PostgresDocumentStore>) -> VaultSearch {
    let provider = Arc::new(DisabledProvider::new("keyword search does not use embeddings"));
    VaultSearch::new(store, provider, config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // Logging goes to stderr; stdout carries command output only
    logging::init_logging(&config, cli.verbose);

    let run_migrations = !cli.skip_migrate || matches!(cli.command, Commands::Migrate);
    let store = Arc::new(PostgresDocumentStore::new(&config.database_url, run_migrations).await?);

    match cli.command {
        Commands::Migrate => {
            println!("Migrations completed successfully.");
        }

        Commands::Ingest { path } => {
            let report = vault::ingest_vault(store.as_ref(), &path).await?;
            print_json(&report)?;
        }

        Commands::Count => {
            print_json(&store.count_by_type().await?)?;
        }

        Commands::Get { id } => {
            print_json(&store.get(&id).await?)?;
        }

        Commands::Search(args) => {
            let service = keyword_service(&config, store);
            print_json(&service.search(&args.query, args.limit, args.doc_type).await?)?;
        }

        Commands::Advanced(args) => {
            let service = keyword_service(&config, store);
            print_json(&service.advanced_search(&args.query, args.limit, args.doc_type).await?)?;
        }

        Commands::Semantic(args) => {
            let (service, _) = build_service(&config, store)?;
            print_json(&service.semantic_search(&args.query, args.limit, args.doc_type).await?)?;
        }

        Commands::Hybrid { query, fts_weight, semantic_weight } => {
            let (service, _) = build_service(&config, store)?;
            let results = service
                .hybrid_search(
                    &query.query,
                    query.limit,
                    fts_weight.unwrap_or(config.search.fts_weight),
                    semantic_weight.unwrap_or(config.search.semantic_weight),
                    query.doc_type,
                )
                .await?;
            print_json(&results)?;
        }

        Commands::Embed { action } => match action {
            EmbedAction::Stats => {
                print_json(&store.embedding_stats().await?)?;
            }
            EmbedAction::Backfill { batch_size } => {
                let (service, provider) = build_service(&config, store)?;
                let batch_size = batch_size.unwrap_or(config.backfill.batch_size);
                run_backfill(&service, provider.model_name(), batch_size).await?;
            }
            EmbedAction::SwitchModel { dry_run } => {
                let (service, provider) = build_service(&config, store)?;
                let model = provider.model_name();
                if dry_run {
                    println!("DRY RUN: switch embeddings to model '{}'", model);
                    println!("Current embedding stats:");
                    print_json(&service.embedding_stats().await?)?;
                    println!("\nThis would:");
                    println!("  - Drop every stored embedding");
                    println!("  - Set embedding_status = 'pending' for those documents");
                    println!("  - Recompute them with '{}' on the next backfill", model);
                    println!("\nRun without --dry-run to apply.");
                } else {
                    let dropped = service.invalidate_embeddings().await?;
                    println!("Dropped {} embeddings.", dropped);
                    println!("Run 'vaultsearch embed backfill' to embed them with '{}'.", model);
                }
            }
        },
    }

    Ok(())
}

/// Run the backfill with a progress bar; Ctrl-C stops it after the current batch.
async fn run_backfill(service: &VaultSearch, model: &str, batch_size: usize) -> Result<()> {
    let stats = service.embedding_stats().await?;
    let outstanding = u64::try_from(stats.outstanding()).unwrap_or(0);

    let pipeline = service.backfill_pipeline();
    let interrupt = pipeline.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping after the current batch...");
            interrupt.store(true, Ordering::Relaxed);
        }
    });

    let bar = ProgressBar::new(outstanding);
    bar.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} embedded ({msg})")?);
    tracing::info!(model, batch_size, outstanding, "Starting embedding backfill");

    let report = pipeline
        .backfill_with(batch_size, |progress| {
            bar.set_position(progress.attempted as u64);
            bar.set_message(format!("{} failed, {} stale", progress.failed, progress.stale));
        })
        .await;
    bar.finish_and_clear();

    let report = report?;
    if report.interrupted {
        eprintln!("Backfill interrupted; rerun to continue.");
    }
    print_json(&report)
}
