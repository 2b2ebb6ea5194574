//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables (a `.env` file is loaded by the binary first).
//! Credentials normally live only in the environment.
//!
//! ```toml
//! [source]
//! channel_id = "C0123456789"
//!
//! [fetch]
//! page_limit = 200
//! last_n = 0
//!
//! [index]
//! index_name = "team-chat"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            channel_id: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_base_url() -> String {
    "https://slack.com/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Keep only the first N messages delivered; `0` fetches everything.
    #[serde(default)]
    pub last_n: usize,
    #[serde(default = "default_oldest")]
    pub oldest: String,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_page_limit")]
    pub users_page_limit: usize,
    #[serde(default = "default_page_limit")]
    pub replies_page_limit: usize,
    #[serde(default = "default_reply_concurrency")]
    pub reply_concurrency: usize,
    /// Abort the run when the user listing fails instead of continuing
    /// with a partial directory.
    #[serde(default)]
    pub strict_directory: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            last_n: 0,
            oldest: default_oldest(),
            throttle_ms: default_throttle_ms(),
            users_page_limit: default_page_limit(),
            replies_page_limit: default_page_limit(),
            reply_concurrency: default_reply_concurrency(),
            strict_directory: false,
        }
    }
}

fn default_page_limit() -> usize {
    200
}
fn default_oldest() -> String {
    "0".to_string()
}
fn default_throttle_ms() -> u64 {
    500
}
fn default_reply_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Cap on attempts per request; absent means retry until the source
    /// stops rate limiting.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    /// Length of one retry-after unit. `0` disables backoff sleeps.
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            default_retry_after_secs: default_retry_after_secs(),
            time_unit_ms: default_time_unit_ms(),
        }
    }
}

fn default_retry_after_secs() -> u64 {
    1
}
fn default_time_unit_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_index_retries")]
    pub max_retries: u32,
    /// Chunk ceiling for message bodies, in approximate tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Extra substrings marking boilerplate that is never indexed.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: default_index_base_url(),
            index_name: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_index_retries(),
            max_tokens: default_max_tokens(),
            skip_patterns: Vec::new(),
        }
    }
}

fn default_index_base_url() -> String {
    "https://api.ducky.ai".to_string()
}
fn default_index_retries() -> u32 {
    3
}
fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./data/channel_history_enriched.json")
}

impl Config {
    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("SLACK_BOT_TOKEN") {
            self.source.token = Some(token);
        }
        if let Some(channel) = get("CHANNEL_ID") {
            self.source.channel_id = Some(channel);
        }
        if let Some(url) = get("SLACK_BASE_URL") {
            self.source.base_url = url;
        }
        if let Some(limit) = get("PAGE_LIMIT") {
            self.fetch.page_limit = limit
                .parse()
                .with_context(|| format!("PAGE_LIMIT must be an integer, got '{}'", limit))?;
        }
        if let Some(last_n) = get("LAST_N") {
            self.fetch.last_n = last_n
                .parse()
                .with_context(|| format!("LAST_N must be an integer, got '{}'", last_n))?;
        }
        if let Some(key) = get("DUCKY_API_KEY") {
            self.index.api_key = Some(key);
        }
        if let Some(name) = get("DUCKY_INDEX_NAME") {
            self.index.index_name = Some(name);
        }
        if let Some(url) = get("DUCKY_BASE_URL") {
            self.index.base_url = url;
        }
        Ok(())
    }

    /// Checks that apply to every command.
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.fetch.page_limit) {
            bail!("fetch.page_limit must be in 1..=1000");
        }
        if self.fetch.users_page_limit == 0 || self.fetch.replies_page_limit == 0 {
            bail!("fetch.users_page_limit and fetch.replies_page_limit must be > 0");
        }
        if self.fetch.reply_concurrency == 0 {
            bail!("fetch.reply_concurrency must be >= 1");
        }
        if self.retry.max_attempts == Some(0) {
            bail!("retry.max_attempts must be >= 1 when set");
        }
        if self.index.max_tokens == 0 {
            bail!("index.max_tokens must be > 0");
        }
        Ok(())
    }

    /// Checks needed before talking to the conversation source.
    pub fn validate_for_fetch(&self) -> Result<()> {
        match self.source.token.as_deref() {
            Some(t) if t.starts_with("xoxb-") || t.starts_with("xoxp-") => {}
            Some(_) => bail!("SLACK_BOT_TOKEN must be a bot (xoxb-) or user (xoxp-) token"),
            None => bail!("SLACK_BOT_TOKEN is not set (env or source.token)"),
        }
        match self.source.channel_id.as_deref() {
            Some(c) if c.starts_with(['C', 'G', 'D']) => {}
            Some(c) => bail!("CHANNEL_ID '{}' must start with C, G or D", c),
            None => bail!("CHANNEL_ID is not set (env or source.channel_id)"),
        }
        Ok(())
    }

    /// Checks needed before calling the index service.
    pub fn validate_for_index(&self) -> Result<()> {
        if self.index.index_name.is_none() {
            bail!("DUCKY_INDEX_NAME is not set (env or index.index_name)");
        }
        if self.index.api_key.is_none() {
            bail!("DUCKY_API_KEY is not set (env or index.api_key)");
        }
        Ok(())
    }

    pub fn channel_id(&self) -> &str {
        self.source.channel_id.as_deref().unwrap_or_default()
    }

    pub fn index_name(&self) -> &str {
        self.index.index_name.as_deref().unwrap_or("dry-run")
    }
}

/// Load configuration from `path` (if it exists) and the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse the TOML file at `path`; a missing file yields the defaults.
pub fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_file_missing() {
        let cfg = read_config_file(Path::new("/nonexistent/harvest.toml")).unwrap();
        assert_eq!(cfg.fetch.page_limit, 200);
        assert_eq!(cfg.fetch.last_n, 0);
        assert_eq!(cfg.retry.default_retry_after_secs, 1);
        assert_eq!(cfg.source.base_url, "https://slack.com/api");
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [fetch]
            page_limit = 50
            reply_concurrency = 2

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fetch.page_limit, 50);
        assert_eq!(cfg.fetch.reply_concurrency, 2);
        assert_eq!(cfg.fetch.throttle_ms, 500);
        assert_eq!(cfg.retry.max_attempts, Some(5));
        assert_eq!(cfg.index.max_tokens, 700);
    }

    #[test]
    fn environment_wins_over_file() {
        let mut cfg: Config = toml::from_str(
            r#"
            [source]
            channel_id = "CFILE"
            "#,
        )
        .unwrap();
        let vars = env(&[
            ("CHANNEL_ID", "CENV"),
            ("SLACK_BOT_TOKEN", "xoxb-123"),
            ("LAST_N", "25"),
            ("DUCKY_INDEX_NAME", "chat"),
        ]);
        cfg.apply_overrides(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.channel_id(), "CENV");
        assert_eq!(cfg.fetch.last_n, 25);
        assert_eq!(cfg.index_name(), "chat");
        cfg.validate_for_fetch().unwrap();
    }

    #[test]
    fn rejects_non_numeric_page_limit() {
        let mut cfg = Config::default();
        let vars = env(&[("PAGE_LIMIT", "lots")]);
        assert!(cfg.apply_overrides(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn fetch_validation_checks_token_and_channel() {
        let mut cfg = Config::default();
        assert!(cfg.validate_for_fetch().is_err());
        cfg.source.token = Some("xoxb-abc".to_string());
        cfg.source.channel_id = Some("X123".to_string());
        assert!(cfg.validate_for_fetch().is_err());
        cfg.source.channel_id = Some("G123".to_string());
        cfg.validate_for_fetch().unwrap();
    }

    #[test]
    fn example_config_parses() {
        let cfg: Config = toml::from_str(include_str!("../config/harvest.example.toml")).unwrap();
        assert_eq!(cfg.channel_id(), "C0123456789");
        assert_eq!(cfg.index_name(), "team-chat");
        assert!(cfg.retry.max_attempts.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn page_limit_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.fetch.page_limit = 5000;
        assert!(cfg.validate().is_err());
    }
}
