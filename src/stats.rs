//! Snapshot statistics.
//!
//! A quick summary of what a fetch produced: message and thread counts,
//! how many records fell back to sentinels, and the time span covered.
//! Used by `harvest stats` to give confidence before indexing.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{ConversationSnapshot, EnrichedMessage, UNKNOWN_USER};
use crate::snapshot::load_snapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub messages: usize,
    pub threads: usize,
    pub replies: usize,
    pub sentinel_timestamps: usize,
    pub unknown_authors: usize,
    pub authors: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl SnapshotStats {
    pub fn from_snapshot(snapshot: &ConversationSnapshot) -> Self {
        let mut stats = SnapshotStats {
            messages: snapshot.len(),
            replies: snapshot.reply_count(),
            ..Default::default()
        };
        let mut authors = std::collections::HashSet::new();

        let all = snapshot
            .messages()
            .iter()
            .flat_map(|m| std::iter::once(m).chain(m.replies()));
        for msg in all {
            stats.observe(msg);
            authors.insert(msg.name.as_str());
        }

        stats.threads = snapshot.messages().iter().filter(|m| m.is_thread()).count();
        stats.authors = authors.len();
        stats
    }

    fn observe(&mut self, msg: &EnrichedMessage) {
        if msg.name == UNKNOWN_USER {
            self.unknown_authors += 1;
        }
        match msg.timestamp.instant() {
            Some(t) => {
                self.earliest = Some(self.earliest.map_or(t, |e| e.min(t)));
                self.latest = Some(self.latest.map_or(t, |l| l.max(t)));
            }
            None => self.sentinel_timestamps += 1,
        }
    }
}

/// Run the stats command: load the snapshot and print a summary.
pub fn run_stats(path: &Path) -> Result<()> {
    let snapshot = load_snapshot(path)?;
    let stats = SnapshotStats::from_snapshot(&snapshot);

    println!("Channel Harvest — Snapshot Stats");
    println!("================================");
    println!();
    println!("  Snapshot:    {}", path.display());
    println!();
    println!("  Messages:    {}", stats.messages);
    println!("  Threads:     {}", stats.threads);
    println!("  Replies:     {}", stats.replies);
    println!("  Authors:     {}", stats.authors);
    println!();
    println!("  Unknown authors:     {}", stats.unknown_authors);
    println!("  Sentinel timestamps: {}", stats.sentinel_timestamps);
    match (stats.earliest, stats.latest) {
        (Some(first), Some(last)) => {
            println!("  Span:        {} → {}", format_ts(first), format_ts(last));
        }
        _ => println!("  Span:        (none)"),
    }
    println!();
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageTime;

    fn msg(name: &str, time: MessageTime) -> EnrichedMessage {
        EnrichedMessage {
            name: name.to_string(),
            text: "x".to_string(),
            timestamp: time,
            replies: None,
        }
    }

    fn at(secs: i64) -> MessageTime {
        MessageTime::At(DateTime::from_timestamp(secs, 0).unwrap())
    }

    #[test]
    fn counts_threads_sentinels_and_span() {
        let mut parent = msg("Alice", at(100));
        parent.attach_replies(vec![msg("Bob", at(150)), msg(UNKNOWN_USER, MessageTime::Unknown)]);
        let snapshot = ConversationSnapshot::new(vec![
            parent,
            msg("Carol", at(300)),
            msg("Alice", MessageTime::Invalid),
        ]);

        let stats = SnapshotStats::from_snapshot(&snapshot);
        assert_eq!(stats.messages, 3);
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.replies, 2);
        assert_eq!(stats.authors, 4);
        assert_eq!(stats.unknown_authors, 1);
        assert_eq!(stats.sentinel_timestamps, 2);
        assert_eq!(stats.earliest.unwrap().timestamp(), 100);
        assert_eq!(stats.latest.unwrap().timestamp(), 300);
    }

    #[test]
    fn empty_snapshot_has_no_span() {
        let stats = SnapshotStats::from_snapshot(&ConversationSnapshot::default());
        assert_eq!(stats, SnapshotStats::default());
    }
}
