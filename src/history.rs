//! Channel history pagination.
//!
//! Walks the history endpoint from the newest page backwards until the
//! cursor runs out or the configured last-N cap is reached.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::fetcher::RateLimitedFetcher;
use crate::models::RawMessage;
use crate::progress::{ProgressEvent, Stage};
use crate::traits::SourceError;

/// Options for [`fetch_history`].
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub page_limit: usize,
    /// Keep only the first N messages delivered; `0` means unbounded.
    pub last_n: usize,
    pub oldest: String,
    /// Pause between consecutive pages.
    pub throttle: Duration,
}

impl HistoryOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            page_limit: config.page_limit,
            last_n: config.last_n,
            oldest: config.oldest.clone(),
            throttle: Duration::from_millis(config.throttle_ms),
        }
    }

    /// Page size actually requested: the page limit, shrunk to the cap.
    pub fn request_size(&self) -> usize {
        if self.last_n > 0 {
            self.page_limit.min(self.last_n)
        } else {
            self.page_limit
        }
    }
}

/// Fetch the raw message stream for the fetcher's channel.
///
/// Pages are appended in delivery order. Any non rate-limit error aborts
/// the whole fetch; no partial stream is returned.
pub async fn fetch_history(
    fetcher: &RateLimitedFetcher,
    opts: &HistoryOptions,
) -> Result<Vec<RawMessage>, SourceError> {
    let mut messages: Vec<RawMessage> = Vec::new();
    let mut cursor: Option<String> = None;
    let size = opts.request_size();

    loop {
        debug!(cursor = ?cursor, total = messages.len(), "fetching history page");
        let page = fetcher
            .fetch_page(cursor.as_deref(), size, &opts.oldest)
            .await?;
        if page.items.is_empty() {
            debug!("history page was empty");
        }
        messages.extend(page.items);

        fetcher.reporter().report(ProgressEvent::Page {
            stage: Stage::Fetch,
            total: messages.len() as u64,
            next_cursor: page.next_cursor.clone(),
        });

        if opts.last_n > 0 && messages.len() >= opts.last_n {
            messages.truncate(opts.last_n);
            info!(last_n = opts.last_n, "reached message cap, stopping pagination");
            break;
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }

        if !opts.throttle.is_zero() {
            tokio::time::sleep(opts.throttle).await;
        }
    }

    info!(messages = messages.len(), "history fetch complete");
    Ok(messages)
}
