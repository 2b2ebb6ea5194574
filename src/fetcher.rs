//! Rate-limit aware access to a [`ConversationSource`].
//!
//! [`RateLimitedFetcher`] performs one logical call at a time and retries
//! *that same call* whenever the source answers with
//! [`SourceError::RateLimited`], sleeping for the server-supplied
//! retry-after (or the policy default when none is given). Any other error
//! is returned to the caller untouched.
//!
//! Sleeping uses `tokio::time::sleep`, so only the task issuing the call is
//! suspended; concurrent reply fetches keep making progress.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::models::{Page, RawMessage, RawUser};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, Stage};
use crate::traits::{
    ConversationSource, HistoryRequest, RepliesRequest, SourceError, UsersRequest,
};

/// How rate-limit responses are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, `None` for no cap.
    pub max_attempts: Option<u32>,
    /// Retry-after used when the response carries none.
    pub default_retry_after: u64,
    /// Wall-clock length of one retry-after unit.
    pub time_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            default_retry_after: 1,
            time_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            default_retry_after: config.default_retry_after_secs,
            time_unit: Duration::from_millis(config.time_unit_ms),
        }
    }

    /// Retry forever without sleeping.
    pub fn immediate() -> Self {
        Self {
            time_unit: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retrying after a rate-limit response.
    pub fn delay_for(&self, retry_after: Option<u64>) -> Duration {
        let units = retry_after.unwrap_or(self.default_retry_after);
        self.time_unit.saturating_mul(units.min(u64::from(u32::MAX)) as u32)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Paginated calls against one channel with transparent rate-limit retry.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    source: Arc<dyn ConversationSource>,
    channel: String,
    policy: RetryPolicy,
    reporter: Arc<dyn ProgressReporter>,
}

impl RateLimitedFetcher {
    pub fn new(source: Arc<dyn ConversationSource>, channel: impl Into<String>) -> Self {
        Self {
            source,
            channel: channel.into(),
            policy: RetryPolicy::default(),
            reporter: Arc::new(NoProgress),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn reporter(&self) -> &Arc<dyn ProgressReporter> {
        &self.reporter
    }

    /// Fetch one page of channel history.
    pub async fn fetch_page(
        &self,
        cursor: Option<&str>,
        limit: usize,
        oldest: &str,
    ) -> Result<Page<RawMessage>, SourceError> {
        let req = HistoryRequest {
            channel: self.channel.clone(),
            cursor: cursor.map(ToOwned::to_owned),
            limit,
            oldest: oldest.to_string(),
        };
        self.with_retry(Stage::Fetch, || self.source.history_page(&req))
            .await
    }

    /// Fetch one page of replies for the thread rooted at `parent_ts`.
    pub async fn fetch_replies(
        &self,
        parent_ts: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<RawMessage>, SourceError> {
        let req = RepliesRequest {
            channel: self.channel.clone(),
            thread_ts: parent_ts.to_string(),
            cursor: cursor.map(ToOwned::to_owned),
            limit,
        };
        self.with_retry(Stage::ReplyPagination, || self.source.replies_page(&req))
            .await
    }

    /// Fetch one page of the user listing.
    pub async fn list_users(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<RawUser>, SourceError> {
        let req = UsersRequest {
            cursor: cursor.map(ToOwned::to_owned),
            limit,
        };
        self.with_retry(Stage::UserDirectory, || self.source.users_page(&req))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, stage: Stage, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match call().await {
                Err(SourceError::RateLimited { retry_after_secs }) => {
                    if self.policy.exhausted(attempts) {
                        return Err(SourceError::RetriesExhausted { attempts });
                    }
                    let wait = self.policy.delay_for(retry_after_secs);
                    warn!(
                        source = self.source.name(),
                        stage = stage.as_str(),
                        attempt = attempts,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    self.reporter.report(ProgressEvent::RateLimited {
                        stage,
                        wait,
                        attempt: attempts,
                    });
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Source whose history endpoint replays a scripted list of outcomes.
    pub(crate) struct ScriptedHistory {
        pub outcomes: Mutex<VecDeque<Result<Page<RawMessage>, SourceError>>>,
        pub requests: Mutex<Vec<HistoryRequest>>,
    }

    impl ScriptedHistory {
        pub fn new(outcomes: Vec<Result<Page<RawMessage>, SourceError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConversationSource for ScriptedHistory {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn history_page(
            &self,
            req: &HistoryRequest,
        ) -> Result<Page<RawMessage>, SourceError> {
            self.requests.lock().unwrap().push(req.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::last(Vec::new())))
        }

        async fn replies_page(
            &self,
            _req: &RepliesRequest,
        ) -> Result<Page<RawMessage>, SourceError> {
            Ok(Page::last(Vec::new()))
        }

        async fn users_page(&self, _req: &UsersRequest) -> Result<Page<RawUser>, SourceError> {
            Ok(Page::last(Vec::new()))
        }
    }

    /// Reporter that records every event.
    #[derive(Default)]
    pub(crate) struct Recorder(pub Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn msg(ts: &str) -> RawMessage {
        RawMessage {
            ts: Some(ts.to_string()),
            text: format!("m{}", ts),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_with_server_backoff() {
        let source = Arc::new(ScriptedHistory::new(vec![
            Err(SourceError::RateLimited {
                retry_after_secs: Some(2),
            }),
            Ok(Page::last(vec![msg("1"), msg("2")])),
        ]));
        let recorder = Arc::new(Recorder::default());
        let fetcher =
            RateLimitedFetcher::new(source.clone(), "C1").with_reporter(recorder.clone());

        let started = tokio::time::Instant::now();
        let page = fetcher.fetch_page(None, 100, "0").await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        let events = recorder.0.lock().unwrap();
        assert_eq!(
            *events,
            vec![ProgressEvent::RateLimited {
                stage: Stage::Fetch,
                wait: Duration::from_secs(2),
                attempt: 1,
            }]
        );
        // The retried request is the same request.
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_retry_after_uses_default() {
        let source = Arc::new(ScriptedHistory::new(vec![
            Err(SourceError::RateLimited {
                retry_after_secs: None,
            }),
            Ok(Page::last(vec![msg("1")])),
        ]));
        let fetcher = RateLimitedFetcher::new(source, "C1");
        let started = tokio::time::Instant::now();
        fetcher.fetch_page(None, 100, "0").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let source = Arc::new(ScriptedHistory::new(vec![
            Err(SourceError::Api {
                method: "conversations.history".to_string(),
                error: "channel_not_found".to_string(),
            }),
            Ok(Page::last(vec![msg("1")])),
        ]));
        let fetcher = RateLimitedFetcher::new(source.clone(), "C1")
            .with_policy(RetryPolicy::immediate());
        let err = fetcher.fetch_page(None, 100, "0").await.unwrap_err();
        assert!(matches!(err, SourceError::Api { .. }));
        assert_eq!(source.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capped_policy_gives_up() {
        let source = Arc::new(ScriptedHistory::new(vec![
            Err(SourceError::RateLimited {
                retry_after_secs: Some(1),
            }),
            Err(SourceError::RateLimited {
                retry_after_secs: Some(1),
            }),
            Ok(Page::last(vec![msg("1")])),
        ]));
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::immediate()
        };
        let fetcher = RateLimitedFetcher::new(source, "C1").with_policy(policy);
        let err = fetcher.fetch_page(None, 100, "0").await.unwrap_err();
        assert!(matches!(err, SourceError::RetriesExhausted { attempts: 2 }));
    }

    #[test]
    fn delay_scales_with_time_unit() {
        let policy = RetryPolicy {
            time_unit: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(Some(3)), Duration::from_millis(30));
        assert_eq!(policy.delay_for(None), Duration::from_millis(10));
        assert_eq!(RetryPolicy::immediate().delay_for(Some(30)), Duration::ZERO);
    }
}
