//! Slack Web API connector.
//!
//! Implements [`ConversationSource`] over three read-only Web API methods:
//!
//! | Method | Used for |
//! |--------|----------|
//! | `conversations.history` | top-level channel messages, newest first |
//! | `conversations.replies` | one thread, parent first |
//! | `users.list` | the identity directory |
//!
//! Every request performs exactly one HTTP call. Rate limiting is reported
//! as [`SourceError::RateLimited`] and retried by the
//! [`RateLimitedFetcher`](crate::fetcher::RateLimitedFetcher), never here.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! base_url = "https://slack.com/api"
//! channel_id = "C0123456789"
//! timeout_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! - `SLACK_BOT_TOKEN`: bot (`xoxb-`) or user (`xoxp-`) token, required
//! - `SLACK_BASE_URL`: overrides `source.base_url`
//!
//! # Rate limits
//!
//! A request counts as rate limited when the HTTP status is 429 or the
//! payload is `{"ok": false, "error": "ratelimited"}`. The `Retry-After`
//! header is parsed as whole seconds; a decimal value is truncated.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SourceConfig;
use crate::models::{Page, RawMessage, RawUser};
use crate::traits::{ConversationSource, HistoryRequest, RepliesRequest, SourceError, UsersRequest};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// A Slack workspace reached through the Web API.
pub struct SlackConnector {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl SlackConnector {
    /// # Errors
    ///
    /// Returns an error if no token is configured or the HTTP client cannot
    /// be built.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| anyhow!("SLACK_BOT_TOKEN is not set (env or source.token)"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build Slack HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Issue one GET and return the decoded `ok: true` payload.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{}/{}", self.base_url, method);
        debug!(method, ?params, "slack request");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("{}: {}", method, e)))?;

        let status = resp.status();
        let retry_after = parse_retry_after_secs(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Transport(format!("{}: {}", method, e)))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let payload: Value = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(_) if !status.is_success() => {
                return Err(SourceError::Transport(format!(
                    "{} returned HTTP {}: {}",
                    method,
                    status,
                    truncate(&body)
                )))
            }
            Err(e) => {
                return Err(SourceError::Decode(format!(
                    "{}: {} (body: {})",
                    method,
                    e,
                    truncate(&body)
                )))
            }
        };

        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            if error == "ratelimited" {
                return Err(SourceError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            if !status.is_success() {
                return Err(SourceError::Transport(format!(
                    "{} returned HTTP {}: {}",
                    method, status, error
                )));
            }
            return Err(SourceError::Api {
                method: method.to_string(),
                error: error.to_string(),
            });
        }

        Ok(payload)
    }
}

#[async_trait]
impl ConversationSource for SlackConnector {
    fn name(&self) -> &str {
        "slack"
    }

    async fn history_page(&self, req: &HistoryRequest) -> Result<Page<RawMessage>, SourceError> {
        let mut params = vec![
            ("channel", req.channel.clone()),
            ("limit", req.limit.to_string()),
            ("oldest", req.oldest.clone()),
        ];
        if let Some(cursor) = &req.cursor {
            params.push(("cursor", cursor.clone()));
        }
        let payload = self.call("conversations.history", &params).await?;
        decode_page::<MessageList, _>("conversations.history", payload, |list| list.messages)
    }

    async fn replies_page(&self, req: &RepliesRequest) -> Result<Page<RawMessage>, SourceError> {
        let mut params = vec![
            ("channel", req.channel.clone()),
            ("ts", req.thread_ts.clone()),
            ("limit", req.limit.to_string()),
        ];
        if let Some(cursor) = &req.cursor {
            params.push(("cursor", cursor.clone()));
        }
        let payload = self.call("conversations.replies", &params).await?;
        decode_page::<MessageList, _>("conversations.replies", payload, |list| list.messages)
    }

    async fn users_page(&self, req: &UsersRequest) -> Result<Page<RawUser>, SourceError> {
        let mut params = vec![("limit", req.limit.to_string())];
        if let Some(cursor) = &req.cursor {
            params.push(("cursor", cursor.clone()));
        }
        let payload = self.call("users.list", &params).await?;
        decode_page::<MemberList, _>("users.list", payload, |list| {
            list.members.into_iter().map(RawUser::from).collect()
        })
    }
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct MemberList {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Deserialize)]
struct Member {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Deserialize, Default)]
struct Profile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl From<Member> for RawUser {
    fn from(member: Member) -> Self {
        let profile = member.profile.unwrap_or_default();
        RawUser {
            id: member.id,
            display_name: profile.display_name,
            real_name: profile.real_name.or(member.real_name),
            handle: member.name,
        }
    }
}

fn decode_page<L, T>(
    method: &str,
    payload: Value,
    items: impl FnOnce(L) -> Vec<T>,
) -> Result<Page<T>, SourceError>
where
    L: serde::de::DeserializeOwned,
{
    let cursor = next_cursor(&payload);
    let list: L = serde_json::from_value(payload)
        .map_err(|e| SourceError::Decode(format!("{}: {}", method, e)))?;
    Ok(Page::new(items(list), cursor))
}

fn next_cursor(payload: &Value) -> Option<String> {
    payload
        .get("response_metadata")
        .and_then(|rm| rm.get("next_cursor"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let value = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    parse_retry_after_value(value)
}

fn parse_retry_after_value(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let whole = value.split_once('.').map(|(w, _)| w).unwrap_or(value);
    whole.parse::<u64>().ok()
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{}...", head)
}
