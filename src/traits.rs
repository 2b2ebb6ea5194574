//! Seams between the pipeline and the outside world.
//!
//! The pipeline consumes a conversation source through [`ConversationSource`]
//! and hands finished documents to an index through [`IndexSink`]. The HTTP
//! implementations live in [`connector_slack`](crate::connector_slack) and
//! [`index_http`](crate::index_http); tests substitute in-memory ones.
//!
//! ```text
//! ┌────────────────────┐      ┌──────────────┐      ┌───────────┐
//! │ ConversationSource │ ───▶ │   Pipeline    │ ───▶ │ IndexSink │
//! │ history / replies  │      │ enrich+thread │      │  index()  │
//! │ users              │      │ dedup+chunk   │      │           │
//! └────────────────────┘      └──────────────┘      └───────────┘
//! ```

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{IndexDocument, Page, RawMessage, RawUser};

/// Failure of a single call against the conversation source.
///
/// Only [`SourceError::RateLimited`] is retried (by
/// [`RateLimitedFetcher`](crate::fetcher::RateLimitedFetcher)); every other
/// variant is fatal for the page that produced it.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("{method} failed: {error}")]
    Api { method: String, error: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("rate limit retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl SourceError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

/// Parameters for one history page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub channel: String,
    pub cursor: Option<String>,
    pub limit: usize,
    /// Lower time bound in source seconds (`"0"` for the full history).
    pub oldest: String,
}

/// Parameters for one page of thread replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliesRequest {
    pub channel: String,
    pub thread_ts: String,
    pub cursor: Option<String>,
    pub limit: usize,
}

/// Parameters for one page of the user listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersRequest {
    pub cursor: Option<String>,
    pub limit: usize,
}

/// A paginated conversation source.
///
/// Each method performs exactly one request and returns either the complete
/// page or an error; implementations never return a partial page.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Short label used in logs (e.g. `"slack"`).
    fn name(&self) -> &str;

    async fn history_page(&self, req: &HistoryRequest) -> Result<Page<RawMessage>, SourceError>;

    /// The first record of a thread's first page is the thread parent.
    async fn replies_page(&self, req: &RepliesRequest) -> Result<Page<RawMessage>, SourceError>;

    async fn users_page(&self, req: &UsersRequest) -> Result<Page<RawUser>, SourceError>;
}

/// Destination for index documents.
///
/// Implementations may be called repeatedly with the same document;
/// deduplication is the caller's job.
#[async_trait]
pub trait IndexSink: Send + Sync {
    fn name(&self) -> &str;

    async fn index(&self, index_name: &str, document: &IndexDocument) -> Result<()>;
}
