//! Core data models used throughout channel-harvest.
//!
//! Raw records are mapped into strongly typed values at the ingestion
//! boundary ([`RawMessage`], [`RawUser`]); everything after that works on
//! [`EnrichedMessage`] and the [`ConversationSnapshot`] built from it.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sentinel for a message that carried no timestamp at all.
pub const UNKNOWN_TIMESTAMP: &str = "UNKNOWN_TIMESTAMP";
/// Sentinel for a message whose timestamp could not be parsed.
pub const INVALID_TIMESTAMP: &str = "INVALID_TIMESTAMP";
/// Author name used when a message has no author id.
pub const UNKNOWN_USER: &str = "Unknown User";

/// A message record as delivered by the history or replies endpoint.
///
/// Every optional field has an explicit default: a missing `text` becomes
/// the empty string, a missing or negative `reply_count` becomes `0`, and
/// numeric `ts`/`thread_ts` values are kept in their textual form so the
/// enricher can tell "missing" from "malformed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct RawMessage {
    pub user: Option<String>,
    pub text: String,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub reply_count: u32,
    pub subtype: Option<String>,
}

impl From<Value> for RawMessage {
    fn from(value: Value) -> Self {
        let user = value
            .get("user")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(ToOwned::to_owned);
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reply_count = value
            .get("reply_count")
            .and_then(Value::as_u64)
            .map(|n| n.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0);
        let subtype = value
            .get("subtype")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        Self {
            user,
            text,
            ts: lenient_ts(value.get("ts")),
            thread_ts: lenient_ts(value.get("thread_ts")),
            reply_count,
            subtype,
        }
    }
}

/// Keep a timestamp field in textual form regardless of its JSON type.
///
/// `null` and absent fields map to `None`; anything else (string, number,
/// or a value of the wrong type) is kept so it can be classified later.
fn lenient_ts(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A member of the user listing, flattened from its wire shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUser {
    pub id: String,
    pub display_name: Option<String>,
    pub real_name: Option<String>,
    pub handle: Option<String>,
}

impl RawUser {
    /// Resolve the preferred name: display name, real name, handle, then id.
    ///
    /// Blank strings count as missing, so the result is never empty for a
    /// user with a non-empty id.
    pub fn preferred_name(&self) -> &str {
        [&self.display_name, &self.real_name, &self.handle]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        let next_cursor = next_cursor
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self { items, next_cursor }
    }

    /// A final page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Normalized message time.
///
/// Ordering puts every resolved instant before the sentinels, so sorting a
/// snapshot keeps malformed records at the tail instead of dropping them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageTime {
    At(DateTime<Utc>),
    Unknown,
    Invalid,
}

impl MessageTime {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            MessageTime::At(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, MessageTime::At(_))
    }
}

impl fmt::Display for MessageTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageTime::At(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, false)),
            MessageTime::Unknown => f.write_str(UNKNOWN_TIMESTAMP),
            MessageTime::Invalid => f.write_str(INVALID_TIMESTAMP),
        }
    }
}

impl Serialize for MessageTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            UNKNOWN_TIMESTAMP => Ok(MessageTime::Unknown),
            INVALID_TIMESTAMP => Ok(MessageTime::Invalid),
            other => DateTime::parse_from_rfc3339(other)
                .map(|dt| MessageTime::At(dt.with_timezone(&Utc)))
                .map_err(|e| {
                    serde::de::Error::custom(format!("invalid timestamp '{}': {}", other, e))
                }),
        }
    }
}

/// A message after author resolution, mention rewriting and timestamp
/// normalization.
///
/// `replies` is `None` for anything that is not a reconstructed thread
/// parent, and `Some` (never empty) once replies have been attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedMessage {
    pub name: String,
    pub text: String,
    pub timestamp: MessageTime,
    #[serde(
        rename = "sub-messages",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replies: Option<Vec<EnrichedMessage>>,
}

impl EnrichedMessage {
    /// Attach replies in timestamp order. An empty set leaves the field absent.
    pub fn attach_replies(&mut self, mut replies: Vec<EnrichedMessage>) {
        if replies.is_empty() {
            self.replies = None;
            return;
        }
        replies.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.replies = Some(replies);
    }

    pub fn replies(&self) -> &[EnrichedMessage] {
        self.replies.as_deref().unwrap_or(&[])
    }

    pub fn is_thread(&self) -> bool {
        self.replies.is_some()
    }
}

/// The ordered, nested result of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationSnapshot {
    messages: Vec<EnrichedMessage>,
}

impl ConversationSnapshot {
    /// Build a snapshot, sorting top-level messages by timestamp.
    ///
    /// The sort is stable, so messages sharing a timestamp keep their
    /// delivery order.
    pub fn new(mut messages: Vec<EnrichedMessage>) -> Self {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self { messages }
    }

    pub fn messages(&self) -> &[EnrichedMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<EnrichedMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn reply_count(&self) -> usize {
        self.messages.iter().map(|m| m.replies().len()).sum()
    }

    /// True when both nesting levels are non-decreasing by timestamp.
    pub fn is_ordered(&self) -> bool {
        fn ordered(msgs: &[EnrichedMessage]) -> bool {
            msgs.windows(2)
                .all(|w| w[0].timestamp.cmp(&w[1].timestamp) != Ordering::Greater)
        }
        ordered(&self.messages) && self.messages.iter().all(|m| ordered(m.replies()))
    }
}

/// Content-addressable identity of one logical message.
///
/// SHA-256 over the whitespace-normalized text and the timestamp string,
/// hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(text: &str, timestamp: &MessageTime) -> Self {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0x1f]);
        hasher.update(timestamp.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of content handed to the index service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocument {
    pub content: String,
    pub metadata: serde_json::Map<String, Value>,
}
