//! # Knowledge Harness CLI (`kbh`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbh init` | Create the store file and schema |
//! | `kbh ingest [--src DIR]...` | Rebuild the index from the source roots |
//! | `kbh search "<query>"` | Ranked search |
//! | `kbh get <path>` | Retrieve one document by exact path |
//! | `kbh status` | Store location and document count |
//! | `kbh tools` | Print the request methods and their parameters |
//! | `kbh serve [--once]` | Answer JSON requests on stdin |
//!
//! Logs go to stderr (`RUST_LOG`, default `warn`); stdout carries only
//! command output and responses.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kb_harness::config::{self, Config};
use kb_harness::store::SqliteStore;
use kb_harness::{dispatch, ingest, query};

const DEFAULT_CONFIG_PATH: &str = "./config/kb.toml";

/// Knowledge Harness: document extraction, full-text indexing and ranked
/// search.
#[derive(Parser)]
#[command(name = "kbh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kb.toml`, which may be absent. An explicitly
    /// given file must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file; overrides `[db] path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store schema. Safe to repeat.
    Init,

    /// Rebuild the whole index from the source roots.
    Ingest {
        /// Source root; repeatable. Defaults to `[sources] roots`.
        #[arg(long = "src")]
        src: Vec<PathBuf>,
    },

    /// Ranked keyword search; every term must match.
    Search {
        query: String,

        /// Maximum results (0 for all). Defaults to `[retrieval] default_limit`.
        #[arg(long)]
        limit: Option<i64>,

        /// Print the JSON response envelope.
        #[arg(long)]
        json: bool,
    },

    /// Show one document by its exact path.
    Get {
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Show store location and document count.
    Status,

    /// Print the request methods and their parameter schemas.
    Tools,

    /// Answer JSON requests on stdin, one per line.
    Serve {
        /// Read all of stdin as a single request.
        #[arg(long)]
        once: bool,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn resolve_config(config_path: Option<&Path>, db: Option<PathBuf>) -> Result<Config> {
    let mut cfg = match config_path {
        Some(path) => config::load_config(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                config::load_config(default_path)?
            } else {
                Config::default()
            }
        }
    };
    if let Some(db) = db {
        cfg.db.path = db;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let cfg = resolve_config(cli.config.as_deref(), cli.db)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&cfg.db.path)
                .await
                .with_context(|| format!("Failed to open store: {}", cfg.db.path.display()))?;
            store.close().await;
            println!("Database initialized: {}", cfg.db.path.display());
        }
        Commands::Ingest { src } => {
            let roots = if src.is_empty() {
                cfg.sources.roots.clone()
            } else {
                src
            };
            ingest::run_ingest(&cfg, &roots).await?;
        }
        Commands::Search { query, limit, json } => {
            query::run_search(&cfg, &query, limit, json).await?;
        }
        Commands::Get { path, json } => {
            query::run_get(&cfg, &path, json).await?;
        }
        Commands::Status => {
            query::run_status(&cfg).await?;
        }
        Commands::Tools => {
            dispatch::run_tools(&cfg)?;
        }
        Commands::Serve { once } => {
            dispatch::run_serve(&cfg, once).await?;
        }
    }

    Ok(())
}
