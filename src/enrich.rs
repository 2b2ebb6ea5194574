//! Per-message enrichment.
//!
//! Turns a [`RawMessage`] into an [`EnrichedMessage`]: resolves the author
//! through the [`IdentityDirectory`], rewrites inline tokens into readable
//! text and normalizes the source timestamp to ISO-8601 UTC.
//!
//! Enrichment is pure and never fails. Missing or malformed data is
//! replaced with a documented sentinel:
//!
//! | Input | Result |
//! |-------|--------|
//! | no author id | author `Unknown User` |
//! | author / mention id not in directory | the raw id |
//! | no `ts` | `UNKNOWN_TIMESTAMP` |
//! | non-numeric `ts` | `INVALID_TIMESTAMP` |
//!
//! Inline tokens rewritten:
//!
//! | Token | Rewritten |
//! |-------|-----------|
//! | `<@U123>`, `<@U123\|alice>` | `@<resolved name>` |
//! | `<#C123\|general>` / `<#C123>` | `#general` / `#C123` |
//! | `<!here>`, `<!channel>`, `<!everyone>` | `@here`, ... |
//! | `<!subteam^S1\|@devs>` | `@devs` |
//! | `<https://x\|label>` / `<https://x>` | `label (https://x)` / `https://x` |

use std::sync::OnceLock;

use chrono::{DateTime, Datelike};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::directory::IdentityDirectory;
use crate::models::{EnrichedMessage, MessageTime, RawMessage, UNKNOWN_USER};

/// Stateless enricher bound to one run's directory.
#[derive(Debug, Clone, Copy)]
pub struct MessageEnricher<'a> {
    directory: &'a IdentityDirectory,
}

impl<'a> MessageEnricher<'a> {
    pub fn new(directory: &'a IdentityDirectory) -> Self {
        Self { directory }
    }

    pub fn enrich(&self, raw: &RawMessage) -> EnrichedMessage {
        enrich(raw, self.directory)
    }
}

/// Enrich a single raw message.
pub fn enrich(raw: &RawMessage, directory: &IdentityDirectory) -> EnrichedMessage {
    let name = match raw.user.as_deref() {
        Some(id) => directory.resolve(id).to_string(),
        None => {
            debug!(ts = ?raw.ts, subtype = ?raw.subtype, "message has no author id");
            UNKNOWN_USER.to_string()
        }
    };

    let timestamp = normalize_timestamp(raw.ts.as_deref());
    match timestamp {
        MessageTime::Unknown => warn!(text = %preview(&raw.text), "message has no timestamp"),
        MessageTime::Invalid => warn!(
            ts = raw.ts.as_deref().unwrap_or_default(),
            text = %preview(&raw.text),
            "message has a malformed timestamp"
        ),
        MessageTime::At(_) => {}
    }

    EnrichedMessage {
        name,
        text: rewrite_tokens(&raw.text, directory),
        timestamp,
        replies: None,
    }
}

/// Convert a source timestamp (epoch seconds, fractional) to a [`MessageTime`].
///
/// Plain decimal input is converted exactly to microsecond precision; other
/// numeric spellings (`1e9`) go through `f64`. Instants outside years
/// 0..=9999 have no RFC 3339 spelling and are treated as malformed.
pub fn normalize_timestamp(ts: Option<&str>) -> MessageTime {
    let Some(raw) = ts else {
        return MessageTime::Unknown;
    };
    match parse_epoch(raw.trim()).filter(|dt| (0..=9999).contains(&dt.year())) {
        Some(dt) => MessageTime::At(dt),
        None => MessageTime::Invalid,
    }
}

fn parse_epoch(raw: &str) -> Option<DateTime<chrono::Utc>> {
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    if !whole.is_empty() && is_digits(whole) && is_digits(frac) {
        let secs: i64 = whole.parse().ok()?;
        let micros: u32 = format!("{:0<6}", &frac[..frac.len().min(6)])
            .parse()
            .ok()?;
        return DateTime::from_timestamp(secs, micros * 1_000);
    }

    let value: f64 = raw.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let micros = (value * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

fn token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"<([^<>\s][^<>]*)>").expect("token regex is valid"))
}

/// Rewrite inline mention, channel, broadcast and link tokens, then undo
/// the source's HTML entity escaping.
pub fn rewrite_tokens(text: &str, directory: &IdentityDirectory) -> String {
    let rewritten = token_pattern().replace_all(text, |caps: &Captures| {
        let inner = &caps[1];
        let (target, label) = match inner.split_once('|') {
            Some((t, l)) => (t, Some(l.trim()).filter(|l| !l.is_empty())),
            None => (inner, None),
        };

        if let Some(id) = target.strip_prefix('@') {
            return format!("@{}", directory.resolve(id.trim()));
        }
        if let Some(id) = target.strip_prefix('#') {
            return format!("#{}", label.unwrap_or(id));
        }
        if let Some(special) = target.strip_prefix('!') {
            return match special {
                "here" | "channel" | "everyone" => format!("@{}", special),
                s if s.starts_with("subteam^") => label
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("@{}", &s["subteam^".len()..])),
                _ => label
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| caps[0].to_string()),
            };
        }
        if target.contains("://") || target.starts_with("mailto:") {
            return match label {
                Some(l) if l != target => format!("{} ({})", l, target),
                _ => target.to_string(),
            };
        }
        caps[0].to_string()
    });

    rewritten
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}
