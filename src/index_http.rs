//! Index sinks.
//!
//! - **[`DuckyIndex`]** posts each document to the hosted index service's
//!   `POST /v1/documents/index` endpoint with retry and backoff.
//! - **[`MemoryIndex`]** keeps documents in memory; used for `--dry-run`
//!   and tests.
//!
//! The HTTP sink retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::models::IndexDocument;
use crate::traits::IndexSink;

const MAX_ERROR_BODY_CHARS: usize = 300;

/// HTTP client for the hosted document index.
pub struct DuckyIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    backoff_unit: Duration,
}

impl DuckyIndex {
    /// Create a sink from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `index.api_key` is unset or the HTTP client
    /// cannot be built.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("DUCKY_API_KEY is not set (env or index.api_key)"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build index HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/documents/index", config.base_url.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            backoff_unit: Duration::from_secs(1),
        })
    }

    /// Scale the backoff schedule (1, 2, 4, ... units).
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IndexSink for DuckyIndex {
    fn name(&self) -> &str {
        "ducky"
    }

    async fn index(&self, index_name: &str, document: &IndexDocument) -> Result<()> {
        let body = json!({
            "index_name": index_name,
            "content": document.content,
            "metadata": document.metadata,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_unit * (1u32 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying index request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }

                    let body_text = truncate(&response.text().await.unwrap_or_default());
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "index service busy");
                        last_err = Some(anyhow!("index API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("index API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "index request failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("indexing failed after retries")))
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{}...", head)
}

/// In-memory sink that records every call.
#[derive(Default)]
pub struct MemoryIndex {
    calls: Mutex<Vec<(String, IndexDocument)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        self.calls()
            .into_iter()
            .map(|(_, document)| document)
            .collect()
    }

    /// Every `(index_name, document)` pair, in call order.
    pub fn calls(&self) -> Vec<(String, IndexDocument)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IndexSink for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn index(&self, index_name: &str, document: &IndexDocument) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("memory index lock poisoned"))?
            .push((index_name.to_string(), document.clone()));
        Ok(())
    }
}
