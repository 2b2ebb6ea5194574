//! Deduplication and index document construction.
//!
//! Walks a [`ConversationSnapshot`] in order and hands one or more
//! [`IndexDocument`]s per surviving message to an [`IndexSink`]:
//!
//! - a top-level message is indexed verbatim, `type = "message"`;
//! - each reply is indexed as `Context: <parent>\nReply: <reply>`,
//!   `type = "reply"`, carrying the parent's timestamp as `parent_id`.
//!
//! Bodies over the chunk budget are re-chunked; every chunk of a reply keeps
//! the parent context in front of it.
//!
//! Each message (parent or reply, checked independently) is identified by
//! its [`DedupKey`]. A key already in the seen-set is skipped silently, so
//! indexing the same snapshot twice through one [`Deduplicator`] only
//! produces index calls on the first pass. Blank messages and join/leave
//! notices are never indexed.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::chunk::chunk_text;
use crate::models::{ConversationSnapshot, DedupKey, EnrichedMessage, IndexDocument};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::traits::IndexSink;

const CHARS_PER_TOKEN: usize = 4;

/// Why a message was or was not indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Index(DedupKey),
    Empty,
    Boilerplate,
    Duplicate,
}

/// Counters from one indexing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub messages_indexed: usize,
    pub replies_indexed: usize,
    pub documents: usize,
    pub skipped_empty: usize,
    pub skipped_boilerplate: usize,
    pub skipped_duplicate: usize,
}

impl IndexReport {
    fn skip(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Empty => self.skipped_empty += 1,
            Verdict::Boilerplate => self.skipped_boilerplate += 1,
            Verdict::Duplicate => self.skipped_duplicate += 1,
            Verdict::Index(_) => {}
        }
    }
}

fn join_leave_pattern() -> &'static Regex {
    static JOIN_LEAVE: OnceLock<Regex> = OnceLock::new();
    JOIN_LEAVE.get_or_init(|| {
        Regex::new(r"(?i)\bhas (joined|left) the (channel|group|conversation)\b")
            .expect("join/leave regex is valid")
    })
}

/// Owns the run's seen-set and turns messages into index documents.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
    max_tokens: usize,
    skip_patterns: Vec<String>,
}

impl Deduplicator {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            seen: HashSet::new(),
            max_tokens: max_tokens.max(1),
            skip_patterns: Vec::new(),
        }
    }

    /// Additional case-insensitive substrings that mark boilerplate.
    pub fn with_skip_patterns(mut self, patterns: Vec<String>) -> Self {
        self.skip_patterns = patterns
            .into_iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        self
    }

    /// Pre-load keys seen by an earlier run.
    pub fn with_seen<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = DedupKey>,
    {
        self.seen.extend(keys);
        self
    }

    pub fn seen(&self) -> &HashSet<DedupKey> {
        &self.seen
    }

    pub fn is_boilerplate(&self, text: &str) -> bool {
        if join_leave_pattern().is_match(text) {
            return true;
        }
        let lower = text.to_lowercase();
        self.skip_patterns.iter().any(|p| lower.contains(p))
    }

    /// Decide whether `msg` should be indexed. Does not record the key.
    pub fn check(&self, msg: &EnrichedMessage) -> Verdict {
        let text = msg.text.trim();
        if text.is_empty() {
            return Verdict::Empty;
        }
        if self.is_boilerplate(text) {
            return Verdict::Boilerplate;
        }
        let key = DedupKey::new(text, &msg.timestamp);
        if self.seen.contains(&key) {
            Verdict::Duplicate
        } else {
            Verdict::Index(key)
        }
    }

    /// Documents for a top-level message at `position` in the snapshot.
    pub fn message_documents(
        &self,
        msg: &EnrichedMessage,
        position: usize,
        key: &DedupKey,
    ) -> Vec<IndexDocument> {
        let mut metadata = base_metadata(msg, &thread_id(position), "message", key);
        let chunks = chunk_text(&msg.text, self.max_tokens);
        metadata.insert("chunk_count".to_string(), json!(chunks.len()));

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let mut metadata = metadata.clone();
                metadata.insert("chunk_index".to_string(), json!(i));
                IndexDocument { content, metadata }
            })
            .collect()
    }

    /// Documents for `reply` under `parent`, each chunk framed with context.
    pub fn reply_documents(
        &self,
        parent: &EnrichedMessage,
        reply: &EnrichedMessage,
        position: usize,
        key: &DedupKey,
    ) -> Vec<IndexDocument> {
        let mut metadata = base_metadata(reply, &thread_id(position), "reply", key);
        metadata.insert("parent_id".to_string(), json!(parent.timestamp.to_string()));

        let budget = self.max_tokens * CHARS_PER_TOKEN;
        let context: String = parent.text.trim().chars().take(budget).collect();
        let chunks = chunk_text(&reply.text, self.max_tokens);
        metadata.insert("chunk_count".to_string(), json!(chunks.len()));

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut metadata = metadata.clone();
                metadata.insert("chunk_index".to_string(), json!(i));
                IndexDocument {
                    content: format!("Context: {}\nReply: {}", context, chunk),
                    metadata,
                }
            })
            .collect()
    }

    /// Index every surviving message and reply of `snapshot` into `sink`.
    ///
    /// A key is recorded only after all of its documents were accepted, so
    /// a failed run can be retried without losing messages.
    pub async fn index_snapshot(
        &mut self,
        snapshot: &ConversationSnapshot,
        sink: &dyn IndexSink,
        index_name: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let total = snapshot.len() as u64;

        for (position, msg) in snapshot.messages().iter().enumerate() {
            match self.check(msg) {
                Verdict::Index(key) => {
                    let docs = self.message_documents(msg, position, &key);
                    report.documents += self.submit(sink, index_name, &docs, msg).await?;
                    report.messages_indexed += 1;
                    self.seen.insert(key);
                }
                verdict => {
                    debug!(position, ?verdict, "skipping message");
                    report.skip(&verdict);
                }
            }

            for reply in msg.replies() {
                match self.check(reply) {
                    Verdict::Index(key) => {
                        let docs = self.reply_documents(msg, reply, position, &key);
                        report.documents += self.submit(sink, index_name, &docs, reply).await?;
                        report.replies_indexed += 1;
                        self.seen.insert(key);
                    }
                    verdict => {
                        debug!(position, ?verdict, "skipping reply");
                        report.skip(&verdict);
                    }
                }
            }

            reporter.report(ProgressEvent::Indexing {
                n: position as u64 + 1,
                total,
            });
        }

        Ok(report)
    }

    async fn submit(
        &self,
        sink: &dyn IndexSink,
        index_name: &str,
        docs: &[IndexDocument],
        msg: &EnrichedMessage,
    ) -> Result<usize> {
        for doc in docs {
            sink.index(index_name, doc).await.with_context(|| {
                format!(
                    "{} rejected message from {} at {}",
                    sink.name(),
                    msg.name,
                    msg.timestamp
                )
            })?;
        }
        Ok(docs.len())
    }
}

fn thread_id(position: usize) -> String {
    format!("thread_{}", position)
}

fn base_metadata(
    msg: &EnrichedMessage,
    thread_id: &str,
    kind: &str,
    key: &DedupKey,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("timestamp".to_string(), json!(msg.timestamp.to_string()));
    metadata.insert("author".to_string(), json!(msg.name));
    metadata.insert("thread_id".to_string(), json!(thread_id));
    metadata.insert("type".to_string(), json!(kind));
    metadata.insert("dedup_key".to_string(), json!(key.as_str()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_http::MemoryIndex;
    use crate::models::MessageTime;
    use crate::progress::NoProgress;
    use chrono::DateTime;

    fn at(secs: i64) -> MessageTime {
        MessageTime::At(DateTime::from_timestamp(secs, 0).unwrap())
    }

    fn msg(name: &str, text: &str, secs: i64) -> EnrichedMessage {
        EnrichedMessage {
            name: name.to_string(),
            text: text.to_string(),
            timestamp: at(secs),
            replies: None,
        }
    }

    fn threaded() -> ConversationSnapshot {
        let mut parent = msg("Alice", "Is the deploy green?", 100);
        parent.attach_replies(vec![msg("Bob", "yes, all checks passed", 101)]);
        ConversationSnapshot::new(vec![parent, msg("Carol", "lunch?", 200)])
    }

    async fn run(dedup: &mut Deduplicator, snapshot: &ConversationSnapshot) -> (MemoryIndex, IndexReport) {
        let sink = MemoryIndex::new();
        let report = dedup
            .index_snapshot(snapshot, &sink, "test", &NoProgress)
            .await
            .unwrap();
        (sink, report)
    }

    #[tokio::test]
    async fn indexes_messages_and_replies_with_context() {
        let mut dedup = Deduplicator::new(700);
        let (sink, report) = run(&mut dedup, &threaded()).await;
        let docs = sink.documents();

        assert_eq!(report.messages_indexed, 2);
        assert_eq!(report.replies_indexed, 1);
        assert_eq!(docs.len(), 3);

        assert_eq!(docs[0].content, "Is the deploy green?");
        assert_eq!(docs[0].metadata["type"], "message");
        assert_eq!(docs[0].metadata["author"], "Alice");
        assert_eq!(docs[0].metadata["thread_id"], "thread_0");

        assert_eq!(
            docs[1].content,
            "Context: Is the deploy green?\nReply: yes, all checks passed"
        );
        assert_eq!(docs[1].metadata["type"], "reply");
        assert_eq!(docs[1].metadata["author"], "Bob");
        assert_eq!(docs[1].metadata["thread_id"], "thread_0");
        assert_eq!(docs[1].metadata["parent_id"], at(100).to_string());

        assert_eq!(docs[2].metadata["thread_id"], "thread_1");
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let mut dedup = Deduplicator::new(700);
        let snapshot = threaded();
        let (_, first) = run(&mut dedup, &snapshot).await;
        let (sink, second) = run(&mut dedup, &snapshot).await;
        assert_eq!(first.documents, 3);
        assert_eq!(second.documents, 0);
        assert_eq!(second.skipped_duplicate, 3);
        assert!(sink.documents().is_empty());
    }

    #[tokio::test]
    async fn upstream_duplicates_emit_one_document() {
        let snapshot = ConversationSnapshot::new(vec![
            msg("Alice", "same words", 100),
            msg("Alice", "same  words", 100),
        ]);
        let (sink, report) = run(&mut Deduplicator::new(700), &snapshot).await;
        assert_eq!(sink.documents().len(), 1);
        assert_eq!(report.skipped_duplicate, 1);
    }

    #[tokio::test]
    async fn blank_and_join_messages_are_skipped() {
        let snapshot = ConversationSnapshot::new(vec![
            msg("Alice", "   \n ", 100),
            msg("Bob", "@Bob has joined the channel", 101),
            msg("Eve", "weekly sync notes", 102),
        ]);
        let mut dedup =
            Deduplicator::new(700).with_skip_patterns(vec!["Weekly Sync".to_string()]);
        let (sink, report) = run(&mut dedup, &snapshot).await;
        assert!(sink.documents().is_empty());
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.skipped_boilerplate, 2);
    }

    #[tokio::test]
    async fn reply_checked_independently_of_parent() {
        let mut parent = msg("Alice", "", 100);
        parent.attach_replies(vec![msg("Bob", "answer", 101)]);
        let snapshot = ConversationSnapshot::new(vec![parent]);
        let (sink, report) = run(&mut Deduplicator::new(700), &snapshot).await;
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.replies_indexed, 1);
        assert_eq!(sink.documents()[0].content, "Context: \nReply: answer");
    }

    #[tokio::test]
    async fn long_reply_is_rechunked_with_context_on_every_chunk() {
        let mut parent = msg("Alice", "question", 100);
        let long = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        parent.attach_replies(vec![msg("Bob", &long, 101)]);
        let snapshot = ConversationSnapshot::new(vec![parent]);

        let (sink, report) = run(&mut Deduplicator::new(10), &snapshot).await;
        let docs = sink.documents();
        assert_eq!(report.documents, 3);
        let replies: Vec<_> = docs.iter().filter(|d| d.metadata["type"] == "reply").collect();
        assert_eq!(replies.len(), 2);
        for (i, doc) in replies.iter().enumerate() {
            assert!(doc.content.starts_with("Context: question\nReply: "));
            assert_eq!(doc.metadata["chunk_index"], i);
            assert_eq!(doc.metadata["chunk_count"], 2);
        }
    }

    #[tokio::test]
    async fn preloaded_seen_keys_skip_messages() {
        let snapshot = threaded();
        let key = DedupKey::new("lunch?", &at(200));
        let mut dedup = Deduplicator::new(700).with_seen(vec![key]);
        let (sink, report) = run(&mut dedup, &snapshot).await;
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(sink.documents().len(), 2);
    }
}
