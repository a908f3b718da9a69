//! # Pulse CLI (`pulse`)
//!
//! ## Usage
//!
//! ```bash
//! pulse --config ./config/pulse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse init` | Create the SQLite database and run schema migrations |
//! | `pulse sources` | List configured sources and the last ingest run |
//! | `pulse sync` | Run one ingestion cycle (fetch, link, normalize, reindex) |
//! | `pulse search "<query>"` | Show the nearest indexed documents |
//! | `pulse ask "<question>"` | Answer a question from the command line |
//! | `pulse serve` | Ingest, then serve the Slack endpoint |
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pulse::app::AppContext;
use pulse::config::load_config;
use pulse::{db, ingest, migrate, search, server, sources};

/// Pulse: a Slack project-status assistant grounded in your tracker,
/// code host and wiki.
#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Pulse: answers project-status questions from Jira, GitHub and Confluence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List configured sources and the most recent ingest run.
    Sources,

    /// Run one ingestion cycle and replace the index.
    Sync,

    /// Semantic search over the index.
    Search {
        /// Search query text.
        query: String,

        /// Maximum number of results. Defaults to `retrieval.top_k`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question with the configured generator.
    Ask {
        /// The question, e.g. "what is blocking ID?".
        question: String,
    },

    /// Start the HTTP server (Slack events and `/ask`).
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            let ctx = AppContext::build(cfg).await?;
            let last_run = match &ctx.run_log {
                Some(log) => log.last_ingest_run().await?,
                None => None,
            };
            sources::list_sources(&ctx.sources, last_run.as_ref());
        }
        Commands::Sync => {
            let ctx = AppContext::build(cfg).await?;
            ingest::run_sync(&ctx).await?;
        }
        Commands::Search { query, limit } => {
            let ctx = AppContext::build(cfg).await?;
            search::run_search(&ctx, &query, limit).await?;
        }
        Commands::Ask { question } => {
            let ctx = AppContext::build(cfg).await?;
            search::run_ask(&ctx, &question).await?;
        }
        Commands::Serve => {
            let ctx = Arc::new(AppContext::build(cfg).await?);
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
