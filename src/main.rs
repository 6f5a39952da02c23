//! # docrag CLI
//!
//! ## Usage
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag init` | Create the SQLite database and run schema migrations |
//! | `docrag ingest <files>` | Ingest PDF, DOCX, or DOC files for a user |
//! | `docrag search "<query>"` | Semantic search over a user's documents |
//! | `docrag documents list` | List a user's documents |
//! | `docrag documents show <id>` | Print a document and its chunks |
//! | `docrag documents delete <id>` | Delete a document, its chunks, and its blob |
//! | `docrag documents purge` | Delete all of a user's documents |
//! | `docrag serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docrag::app::AppContext;
use docrag::progress::ProgressMode;
use docrag::{config, documents, ingest, migrate, search, server};

/// docrag: document ingestion and semantic retrieval for RAG chat.
#[derive(Parser)]
#[command(name = "docrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest files on behalf of a user.
    ///
    /// Each file goes through the same pipeline as an HTTP upload:
    /// validation, storage, extraction, chunking, embedding, persistence.
    Ingest {
        /// Files to ingest (.pdf, .docx, .doc).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Owner of the ingested documents.
        #[arg(long, default_value = "local")]
        user: String,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long, value_parser = parse_progress_mode)]
        progress: Option<ProgressMode>,
    },

    /// Semantic search over a user's documents.
    Search {
        /// The search query.
        query: String,

        #[arg(long, default_value = "local")]
        user: String,

        /// Maximum number of results (default from `[retrieval].limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity (default from `[retrieval].min_score`).
        #[arg(long)]
        min_score: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List, inspect, or delete documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List documents, newest first.
    List {
        #[arg(long, default_value = "local")]
        user: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a document's metadata and chunks.
    Show {
        id: String,

        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Delete a document with its chunks and stored file.
    Delete {
        id: String,

        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Delete every document the user owns.
    Purge {
        #[arg(long, default_value = "local")]
        user: String,
    },
}

fn parse_progress_mode(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}': use off, human, or json", s))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docrag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = AppContext::init(&cfg).await?;

    let outcome = match cli.command {
        Commands::Init => Ok(()),
        Commands::Ingest {
            files,
            user,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&ctx.pipeline, &user, &files, mode).await
        }
        Commands::Search {
            query,
            user,
            limit,
            min_score,
            json,
        } => {
            let opts = ctx.search_options(&user, &query, limit, min_score);
            search::run_search(ctx.store.as_ref(), ctx.embedder.as_ref(), &opts, json).await
        }
        Commands::Documents { action } => match action {
            DocumentsAction::List { user, json } => {
                documents::run_list(ctx.store.as_ref(), &user, json).await
            }
            DocumentsAction::Show { id, user } => {
                documents::run_show(ctx.store.as_ref(), &user, &id).await
            }
            DocumentsAction::Delete { id, user } => {
                documents::run_delete(ctx.store.as_ref(), ctx.blobs.as_ref(), &user, &id).await
            }
            DocumentsAction::Purge { user } => {
                documents::run_purge(ctx.store.as_ref(), ctx.blobs.as_ref(), &user).await
            }
        },
        Commands::Serve => server::run_server(ctx.clone()).await,
    };

    ctx.close().await;
    outcome
}
