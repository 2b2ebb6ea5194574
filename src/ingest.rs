//! Ingestion pipeline orchestration.
//!
//! Coordinates the stages of a run: history fetch and user directory
//! (concurrently) → enrichment and thread reconstruction → snapshot →
//! deduplication → indexing. Reply-pagination failures are non-fatal; every
//! other stage failure aborts the run with the stage named in the error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::connector_slack::SlackConnector;
use crate::dedup::{Deduplicator, IndexReport};
use crate::directory::IdentityDirectory;
use crate::fetcher::{RateLimitedFetcher, RetryPolicy};
use crate::history::{fetch_history, HistoryOptions};
use crate::index_http::{DuckyIndex, MemoryIndex};
use crate::models::ConversationSnapshot;
use crate::progress::{ProgressReporter, Stage};
use crate::snapshot::{load_seen, load_snapshot, save_seen, save_snapshot};
use crate::thread::{ThreadReconstructor, ThreadReport};
use crate::traits::{ConversationSource, IndexSink};

/// Everything the fetch stage produced.
#[derive(Debug)]
pub struct FetchOutcome {
    pub snapshot: ConversationSnapshot,
    pub fetched: usize,
    pub users: usize,
    /// Set when the user listing stopped early and names may be raw ids.
    pub directory_partial: bool,
    pub threads: ThreadReport,
}

/// Run the fetch, user-directory and reply-pagination stages against
/// `source` and return the reconstructed snapshot.
pub async fn fetch_snapshot(
    source: Arc<dyn ConversationSource>,
    config: &Config,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<FetchOutcome> {
    let fetcher = RateLimitedFetcher::new(source, config.channel_id())
        .with_policy(RetryPolicy::from_config(&config.retry))
        .with_reporter(reporter);
    let opts = HistoryOptions::from_config(&config.fetch);

    let (history, build) = tokio::join!(
        fetch_history(&fetcher, &opts),
        IdentityDirectory::build(&fetcher, config.fetch.users_page_limit),
    );

    let raw = history.with_context(|| format!("{} stage failed", Stage::Fetch))?;

    let directory_partial = match build.failure {
        Some(e) if config.fetch.strict_directory => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("{} stage failed", Stage::UserDirectory));
        }
        Some(e) => {
            warn!(error = %e, "continuing with a partial user directory");
            true
        }
        None => false,
    };
    let directory = build.directory;

    let (snapshot, threads) = ThreadReconstructor::new(&fetcher, &directory)
        .with_page_limit(config.fetch.replies_page_limit)
        .with_concurrency(config.fetch.reply_concurrency)
        .reconstruct(&raw)
        .await;

    if threads.failed_threads > 0 {
        warn!(
            failed = threads.failed_threads,
            parents = threads.parents,
            "some threads were collected only partially"
        );
    }
    info!(
        messages = snapshot.len(),
        replies = snapshot.reply_count(),
        users = directory.len(),
        "snapshot reconstructed"
    );

    Ok(FetchOutcome {
        snapshot,
        fetched: raw.len(),
        users: directory.len(),
        directory_partial,
        threads,
    })
}

/// Deduplicate `snapshot` and hand the surviving documents to `sink`.
///
/// With `seen`, keys from an earlier run are loaded first and the updated
/// set is written back even when indexing fails part-way.
pub async fn index_into(
    config: &Config,
    snapshot: &ConversationSnapshot,
    sink: &dyn IndexSink,
    seen: Option<&Path>,
    reporter: &dyn ProgressReporter,
) -> Result<IndexReport> {
    let previous = match seen {
        Some(path) => load_seen(path)?,
        None => Vec::new(),
    };

    let mut dedup = Deduplicator::new(config.index.max_tokens)
        .with_skip_patterns(config.index.skip_patterns.clone())
        .with_seen(previous);

    let result = dedup
        .index_snapshot(snapshot, sink, config.index_name(), reporter)
        .await;

    if let Some(path) = seen {
        save_seen(path, dedup.seen())?;
    }

    result.with_context(|| format!("{} stage failed", Stage::Indexing))
}

/// `harvest fetch`: fetch the channel and write the snapshot file.
pub async fn run_fetch(
    config: &Config,
    output: Option<PathBuf>,
    last_n: Option<usize>,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(n) = last_n {
        config.fetch.last_n = n;
    }
    config.validate_for_fetch()?;

    let source = Arc::new(SlackConnector::new(&config.source)?);
    let outcome = fetch_snapshot(source, &config, reporter).await?;

    let path = output.unwrap_or_else(|| config.snapshot.path.clone());
    save_snapshot(&path, &outcome.snapshot)?;

    print_fetch_summary(config.channel_id(), &outcome);
    println!("  snapshot: {}", path.display());
    println!("ok");
    Ok(())
}

/// `harvest index`: index a snapshot file.
pub async fn run_index(
    config: &Config,
    input: Option<PathBuf>,
    seen: Option<PathBuf>,
    dry_run: bool,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<()> {
    let path = input.unwrap_or_else(|| config.snapshot.path.clone());
    let snapshot = load_snapshot(&path)?;
    index_stage(config, &snapshot, seen.as_deref(), dry_run, reporter.as_ref()).await
}

/// `harvest sync`: fetch, persist the snapshot, then index it in one run.
pub async fn run_sync(
    config: &Config,
    dry_run: bool,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<()> {
    config.validate_for_fetch()?;
    if !dry_run {
        config.validate_for_index()?;
    }

    let source = Arc::new(SlackConnector::new(&config.source)?);
    let outcome = fetch_snapshot(source, config, reporter.clone()).await?;
    save_snapshot(&config.snapshot.path, &outcome.snapshot)?;

    print_fetch_summary(config.channel_id(), &outcome);
    println!("  snapshot: {}", config.snapshot.path.display());

    index_stage(config, &outcome.snapshot, None, dry_run, reporter.as_ref()).await
}

async fn index_stage(
    config: &Config,
    snapshot: &ConversationSnapshot,
    seen: Option<&Path>,
    dry_run: bool,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let report = if dry_run {
        let sink = MemoryIndex::new();
        index_into(config, snapshot, &sink, None, reporter).await?
    } else {
        config.validate_for_index()?;
        let sink = DuckyIndex::new(&config.index)?;
        index_into(config, snapshot, &sink, seen, reporter).await?
    };

    if dry_run {
        println!("index {} (dry-run)", config.index_name());
    } else {
        println!("index {}", config.index_name());
    }
    println!("  messages indexed: {}", report.messages_indexed);
    println!("  replies indexed: {}", report.replies_indexed);
    println!("  documents: {}", report.documents);
    println!("  skipped duplicates: {}", report.skipped_duplicate);
    println!("  skipped empty: {}", report.skipped_empty);
    println!("  skipped boilerplate: {}", report.skipped_boilerplate);
    println!("ok");
    Ok(())
}

fn print_fetch_summary(channel: &str, outcome: &FetchOutcome) {
    println!("fetch {}", channel);
    println!("  fetched: {} messages", outcome.fetched);
    println!("  threads: {}", outcome.threads.parents);
    println!("  replies: {}", outcome.threads.replies);
    if outcome.threads.failed_threads > 0 {
        println!("  partial threads: {}", outcome.threads.failed_threads);
    }
    if outcome.directory_partial {
        println!("  users: {} (partial)", outcome.users);
    } else {
        println!("  users: {}", outcome.users);
    }
}
