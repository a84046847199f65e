//! # ragsync CLI
//!
//! ## Usage
//!
//! ```bash
//! ragsync --config ./config/ragsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync init` | Create the SQLite index and run schema migrations |
//! | `ragsync ingest [--dir]` | Bulk-ingest a directory |
//! | `ragsync watch` | Watch the directory and keep the index in sync |
//! | `ragsync reconcile` | Run one drift-repair pass |
//! | `ragsync search "<query>"` | Similarity search |
//! | `ragsync sources` | List indexed sources |
//! | `ragsync get <source>` | Print every chunk of one source |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragsync::search::SearchFilters;
use ragsync::{config, db, ingest, migrate, search, sources, sync};

/// ragsync keeps a vector index in step with a directory of documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "ragsync: keep a vector index in sync with a document directory",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragsync.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index schema.
    ///
    /// Creates the SQLite file and the `vectors` table. Idempotent.
    Init,

    /// Ingest every supported file in a directory.
    Ingest {
        /// Directory to ingest. Defaults to `[watch].dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Watch `[watch].dir` and keep the index in sync until Ctrl-C.
    ///
    /// Runs one reconciliation at startup, then applies filesystem events
    /// as they arrive and reconciles every `reconcile_interval_secs`.
    Watch,

    /// Run a single reconciliation pass and report what changed.
    Reconcile,

    /// Search indexed chunks by similarity.
    ///
    /// An empty query lists matching chunks in source order without
    /// embedding anything.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `[retrieval].default_k`.
        #[arg(long)]
        limit: Option<usize>,

        /// Only chunks of this source path.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        topic: Option<String>,
    },

    /// List indexed sources with vector counts.
    Sources,

    /// Print every chunk stored for a source path.
    Get { source: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ragsync=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Index initialized successfully.");
        }
        Commands::Ingest { dir } => {
            ingest::run_ingest(&cfg, dir).await?;
        }
        Commands::Watch => {
            sync::run_watch(&cfg).await?;
        }
        Commands::Reconcile => {
            sync::run_reconcile(&cfg).await?;
        }
        Commands::Search {
            query,
            limit,
            source,
            category,
            topic,
        } => {
            let filters = SearchFilters {
                source,
                category,
                topic,
            };
            search::run_search(&cfg, &query, limit, filters).await?;
        }
        Commands::Sources => {
            sources::run_sources(&cfg).await?;
        }
        Commands::Get { source } => {
            sources::run_get(&cfg, &source).await?;
        }
    }

    Ok(())
}
