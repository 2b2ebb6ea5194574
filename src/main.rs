//! # Channel Harvest CLI (`harvest`)
//!
//! The `harvest` binary fetches a channel's conversation history, rebuilds
//! its threads into a nested snapshot and indexes the snapshot into a
//! hosted document index.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest fetch` | Fetch, enrich and reconstruct threads; write the snapshot |
//! | `harvest index` | Deduplicate a snapshot and index it |
//! | `harvest sync` | `fetch` followed by `index` in one run |
//! | `harvest stats` | Summarize a snapshot file |
//! | `harvest completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Fetch the latest 500 messages of $CHANNEL_ID
//! harvest fetch --last-n 500
//!
//! # Index, remembering what was already sent across runs
//! harvest index --seen ./data/seen.json
//!
//! # See what would be indexed without calling the index service
//! harvest index --dry-run
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use channel_harvest::config;
use channel_harvest::ingest;
use channel_harvest::progress::ProgressMode;
use channel_harvest::stats;

/// Channel Harvest: conversation history ingestion for retrieval indexes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Credentials and the channel id are normally supplied through the
/// environment or a `.env` file.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Channel Harvest — fetch, thread and index channel conversation history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Progress on stderr: human, json or off. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the channel and write the enriched snapshot.
    ///
    /// Paginates the history (with rate-limit backoff), builds the user
    /// directory, resolves mentions, normalizes timestamps and nests thread
    /// replies under their parents.
    Fetch {
        /// Snapshot path (defaults to `snapshot.path`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep only the newest N messages (0 = all).
        #[arg(long)]
        last_n: Option<usize>,
    },

    /// Deduplicate a snapshot and send it to the index.
    Index {
        /// Snapshot path (defaults to `snapshot.path`).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Seen-set file shared across runs (JSON array of keys).
        #[arg(long)]
        seen: Option<PathBuf>,

        /// Build documents in memory only; print counts.
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch then index in a single run.
    Sync {
        /// Build documents in memory only; print counts.
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize a snapshot file.
    Stats {
        /// Snapshot path (defaults to `snapshot.path`).
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "harvest", &mut std::io::stdout());
        return Ok(());
    }

    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let reporter = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Fetch { output, last_n } => {
            ingest::run_fetch(&cfg, output, last_n, reporter).await?;
        }
        Commands::Index {
            input,
            seen,
            dry_run,
        } => {
            ingest::run_index(&cfg, input, seen, dry_run, reporter).await?;
        }
        Commands::Sync { dry_run } => {
            ingest::run_sync(&cfg, dry_run, reporter).await?;
        }
        Commands::Stats { input } => {
            let path = input.unwrap_or_else(|| cfg.snapshot.path.clone());
            stats::run_stats(&path)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
