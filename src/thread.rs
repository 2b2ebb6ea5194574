//! Thread reconstruction.
//!
//! Walks the flat, chronological message stream, recognizes thread parents,
//! pages through each parent's replies and nests them under the parent.
//!
//! # Classification
//!
//! A message is a thread parent iff `ts == thread_ts` and `reply_count > 0`.
//! Everything else is standalone. Replies that also surface in the
//! top-level stream are kept there; the indexer's dedup key drops them
//! later.
//!
//! # Failure policy
//!
//! An error while paging one thread stops only that thread. Replies already
//! gathered are still attached and the remaining parents are processed.
//!
//! # Concurrency
//!
//! Reply pagination for distinct parents runs concurrently (bounded by
//! `concurrency`). Each parent owns its cursor and its reply buffer, and
//! order is restored afterwards by sorting both levels by timestamp.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::directory::IdentityDirectory;
use crate::enrich::MessageEnricher;
use crate::fetcher::RateLimitedFetcher;
use crate::models::{ConversationSnapshot, EnrichedMessage, RawMessage};
use crate::progress::ProgressEvent;
use crate::traits::SourceError;

/// How one raw message participates in threading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole<'a> {
    /// Starts a thread; replies are fetched with this thread id.
    Parent(&'a str),
    Standalone,
}

/// Classify a raw message.
pub fn classify(raw: &RawMessage) -> ThreadRole<'_> {
    if raw.reply_count == 0 {
        return ThreadRole::Standalone;
    }
    match (raw.ts.as_deref(), raw.thread_ts.as_deref()) {
        (Some(ts), Some(thread_ts)) if ts == thread_ts => ThreadRole::Parent(ts),
        (_, None) => {
            warn!(
                ts = ?raw.ts,
                reply_count = raw.reply_count,
                "message reports replies but has no thread_ts; treating as standalone"
            );
            ThreadRole::Standalone
        }
        _ => ThreadRole::Standalone,
    }
}

pub fn is_thread_parent(raw: &RawMessage) -> bool {
    matches!(classify(raw), ThreadRole::Parent(_))
}

/// Replies gathered for one parent.
#[derive(Debug)]
pub struct ReplyCollection {
    pub replies: Vec<EnrichedMessage>,
    /// Set when pagination stopped early; `replies` holds what was gathered.
    pub failure: Option<SourceError>,
}

/// Counters from one reconstruction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadReport {
    pub parents: usize,
    pub replies: usize,
    pub failed_threads: usize,
}

/// Builds a [`ConversationSnapshot`] from a raw message stream.
pub struct ThreadReconstructor<'a> {
    fetcher: &'a RateLimitedFetcher,
    enricher: MessageEnricher<'a>,
    page_limit: usize,
    concurrency: usize,
}

impl<'a> ThreadReconstructor<'a> {
    pub fn new(fetcher: &'a RateLimitedFetcher, directory: &'a IdentityDirectory) -> Self {
        Self {
            fetcher,
            enricher: MessageEnricher::new(directory),
            page_limit: 200,
            concurrency: 1,
        }
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enrich every message, attach replies to thread parents and sort.
    pub async fn reconstruct(
        &self,
        raw: &[RawMessage],
    ) -> (ConversationSnapshot, ThreadReport) {
        let mut messages: Vec<EnrichedMessage> =
            raw.iter().map(|m| self.enricher.enrich(m)).collect();

        let parents: Vec<(usize, &str)> = raw
            .iter()
            .enumerate()
            .filter_map(|(i, m)| match classify(m) {
                ThreadRole::Parent(ts) => Some((i, ts)),
                ThreadRole::Standalone => None,
            })
            .collect();

        let total = parents.len() as u64;
        let mut report = ThreadReport {
            parents: parents.len(),
            ..Default::default()
        };

        let collected: Vec<(usize, ReplyCollection)> = stream::iter(parents)
            .map(|(idx, ts)| async move { (idx, self.collect_replies(ts).await) })
            .buffer_unordered(self.concurrency)
            .enumerate()
            .map(|(n, item)| {
                self.fetcher.reporter().report(ProgressEvent::Threads {
                    n: n as u64 + 1,
                    total,
                });
                item
            })
            .collect()
            .await;

        for (idx, collection) in collected {
            if collection.failure.is_some() {
                report.failed_threads += 1;
            }
            report.replies += collection.replies.len();
            messages[idx].attach_replies(collection.replies);
        }

        (ConversationSnapshot::new(messages), report)
    }

    /// Page through the replies of the thread rooted at `parent_ts`.
    ///
    /// The first record of the first page is the parent itself and is
    /// dropped, as is any later record carrying the parent's timestamp.
    pub async fn collect_replies(&self, parent_ts: &str) -> ReplyCollection {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;
        let mut first_page = true;

        loop {
            let page = match self
                .fetcher
                .fetch_replies(parent_ts, cursor.as_deref(), self.page_limit)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        thread = parent_ts,
                        gathered = replies.len(),
                        error = %e,
                        "reply pagination failed; keeping partial thread"
                    );
                    return ReplyCollection {
                        replies,
                        failure: Some(e),
                    };
                }
            };

            let skip = usize::from(first_page);
            first_page = false;
            replies.extend(
                page.items
                    .iter()
                    .skip(skip)
                    .filter(|m| m.ts.as_deref() != Some(parent_ts))
                    .map(|m| self.enricher.enrich(m)),
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(thread = parent_ts, replies = replies.len(), "thread collected");
        ReplyCollection {
            replies,
            failure: None,
        }
    }
}
