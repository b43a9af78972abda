//! # dossier CLI
//!
//! The `dossier` binary manages a local client-document pipeline: database
//! initialization, client records, document ingestion, search, and the
//! long-running worker process.
//!
//! ## Usage
//!
//! ```bash
//! dossier --config ./config/dossier.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dossier init` | Create the SQLite database and run schema migrations |
//! | `dossier client add` | Register a client |
//! | `dossier client find "<query>"` | Fuzzy-search clients by name, email or description |
//! | `dossier ingest <client-id>` | Ingest a document for a client |
//! | `dossier get <id>` | Print a document with its chunks |
//! | `dossier search "<query>"` | Vector search over embedded documents |
//! | `dossier run` | Start the worker pool and maintenance scheduler |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use dossier::error::DossierError;
use dossier::events::{self, PipelineContext};
use dossier::provider::{OpenAiChatModel, OpenAiEmbeddingModel};
use dossier::{
    config, db, ingest, maintenance, migrate, search, store_chunks, store_clients, store_documents,
};

/// dossier — an ingestion and search pipeline for client documents.
#[derive(Parser)]
#[command(
    name = "dossier",
    about = "Client document ingestion, summarization and search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dossier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Manage client records.
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },

    /// Ingest a document for a client.
    ///
    /// Content comes from `--file` or `--content`. The document is chunked
    /// and queued for embedding and summarization; run `dossier run` to
    /// process the queue.
    Ingest {
        /// Owning client UUID.
        client_id: Uuid,

        /// Document title.
        #[arg(long)]
        title: String,

        /// Read content from this file.
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,

        /// Literal content.
        #[arg(long)]
        content: Option<String>,
    },

    /// Print a document, its summary and its chunk statuses.
    Get {
        /// Document UUID.
        id: Uuid,
    },

    /// Vector search over embedded documents.
    ///
    /// Requires `OPENAI_API_KEY` for query embedding.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to one client's documents.
        #[arg(long)]
        client: Option<Uuid>,
    },

    /// Run the pipeline: worker pool, maintenance scheduler, and startup
    /// backlog recovery. Stops on ctrl-c.
    Run,
}

#[derive(Subcommand)]
enum ClientAction {
    /// Register a client.
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        description: Option<String>,
        /// Social profile URL; repeatable.
        #[arg(long = "link")]
        links: Vec<String>,
    },

    /// Fuzzy-search clients by name, email or description.
    Find {
        /// The search query string (3 to 500 characters).
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Client { action } => match action {
            ClientAction::Add {
                first_name,
                last_name,
                email,
                description,
                links,
            } => {
                let pool = db::connect(&cfg).await?;
                let client = store_clients::insert(
                    &pool,
                    &first_name,
                    &last_name,
                    &email,
                    description.as_deref(),
                    &links,
                )
                .await?;
                println!("Created client {} ({})", client.id, client.email);
            }
            ClientAction::Find { query } => {
                let pool = db::connect(&cfg).await?;
                let response = search::find_client(&pool, &cfg, &query).await?;
                if response.matches.is_empty() && response.suggestions.is_empty() {
                    println!("No clients found.");
                }
                for m in &response.matches {
                    println!(
                        "{}  {} {}  <{}>",
                        m.client.id, m.client.first_name, m.client.last_name, m.client.email
                    );
                }
                if !response.suggestions.is_empty() {
                    println!("Did you mean:");
                    for s in &response.suggestions {
                        println!(
                            "  {}  {} {}  <{}>  (score {:.2})",
                            s.client.id,
                            s.client.first_name,
                            s.client.last_name,
                            s.client.email,
                            s.score
                        );
                    }
                }
            }
        },
        Commands::Ingest {
            client_id,
            title,
            file,
            content,
        } => {
            let body = match (file, content) {
                (Some(path), None) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(text)) => text,
                _ => bail!("provide exactly one of --file or --content"),
            };

            let pool = db::connect(&cfg).await?;
            // No runtime is attached here; the signal is dropped and the
            // backlog is picked up when `dossier run` starts.
            let (bus, _receivers) = events::signal_bus();
            let document =
                ingest::ingest_document(&pool, &cfg, &bus, client_id, &title, &body).await?;
            println!(
                "Ingested document {} ({} chunks pending)",
                document.id,
                store_chunks::count_pending(&pool, document.id).await?
            );
        }
        Commands::Get { id } => {
            let pool = db::connect(&cfg).await?;
            let document = store_documents::get(&pool, id)
                .await?
                .ok_or_else(|| DossierError::not_found("document", id))?;
            println!("Document:  {}", document.id);
            println!("Client:    {}", document.client_id);
            println!("Title:     {}", document.title);
            println!("Status:    {}", document.status);
            println!("Summary:   {}", document.summary_status);
            if let Some(summary) = &document.summary {
                println!("\n{summary}\n");
            }
            for chunk in store_chunks::chunks_for_document(&pool, id).await? {
                println!(
                    "  chunk {}  {}  attempts={}",
                    chunk.id, chunk.status, chunk.attempts
                );
            }
        }
        Commands::Search { query, client } => {
            let pool = db::connect(&cfg).await?;
            let embedder = OpenAiEmbeddingModel::new(&cfg.provider)?;
            let results = search::find_documents(&pool, &cfg, &embedder, client, &query).await?;
            if results.is_empty() {
                println!("No matching documents.");
            }
            for result in results {
                println!("{:.3}  {}  {}", result.score, result.document_id, result.title);
                if let Some(summary) = &result.summary {
                    println!("       {summary}");
                }
            }
        }
        Commands::Run => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let chat = Arc::new(OpenAiChatModel::new(&cfg.provider)?);
            let embedder = Arc::new(OpenAiEmbeddingModel::new(&cfg.provider)?);
            let (bus, receivers) = events::signal_bus();
            let ctx = Arc::new(PipelineContext::new(pool, cfg, chat, embedder, bus));

            events::rearm_backlog(&ctx).await?;

            let pipeline = tokio::spawn(events::run_pipeline(ctx.clone(), receivers));
            let chunk_maint = tokio::spawn(maintenance::chunk_maintenance_loop(ctx.clone()));
            let summary_maint = tokio::spawn(maintenance::summary_maintenance_loop(ctx.clone()));

            info!("pipeline running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");

            pipeline.abort();
            chunk_maint.abort();
            summary_maint.abort();
        }
    }

    Ok(())
}
