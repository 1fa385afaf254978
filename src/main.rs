//! # Patent Ingest CLI (`patents`)
//!
//! ## Usage
//!
//! ```bash
//! patents --config ./config/patents.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `patents init` | Create the SQLite database and run schema migrations |
//! | `patents fetch` | Run one ingestion to completion |
//! | `patents count` | Print the number of stored patents |
//! | `patents stats` | Database and cache overview |
//! | `patents serve` | Start the HTTP control server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use patent_ingest::config;
use patent_ingest::ingest::Pipeline;
use patent_ingest::ingestor::Ingestor;
use patent_ingest::migrate;
use patent_ingest::progress::{NoProgress, ProgressMode};
use patent_ingest::server;
use patent_ingest::stats;
use patent_ingest::store::PatentStore;

/// Patent open-data ingestion: CKAN catalog → cache → normalized SQLite.
#[derive(Parser)]
#[command(name = "patents", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/patents.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Idempotent.
    Init,

    /// Run one ingestion to completion and print the run summary.
    Fetch {
        /// Ignore cached downloads and processed flags.
        #[arg(long)]
        refresh: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the number of patents in the main table.
    Count,

    /// Show database and cache statistics.
    Stats,

    /// Start the HTTP control server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Fetch { refresh, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let pipeline = Pipeline::from_config(&cfg, refresh).await?;
            let ingestor = Ingestor::new(pipeline, mode.reporter());
            let summary = ingestor.run_to_completion().await?;

            println!("fetch");
            println!("  datasets: {}", summary.datasets);
            println!("  resources seen: {}", summary.resources_seen);
            println!("  processed: {}", summary.processed);
            println!("  skipped: {}", summary.skipped);
            println!("  failed: {}", summary.failed);
            println!("  records ingested: {}", summary.records_ingested);
            println!("  patents stored: {}", ingestor.patent_count().await?);
            println!("ok");
        }
        Commands::Count => {
            let store = PatentStore::open(&cfg).await?;
            println!("{}", store.patent_count().await?);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            let pipeline = Pipeline::from_config(&cfg, false).await?;
            let ingestor = Arc::new(Ingestor::new(pipeline, Arc::new(NoProgress)));
            server::run_server(&cfg, ingestor).await?;
        }
    }

    Ok(())
}
