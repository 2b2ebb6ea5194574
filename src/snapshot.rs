//! Persisted conversation snapshots.
//!
//! The snapshot file is the hand-off between `harvest fetch` and
//! `harvest index`: a pretty-printed JSON array of enriched top-level
//! messages, each optionally carrying its replies under `sub-messages`.
//!
//! ```json
//! [
//!   {
//!     "name": "Alice",
//!     "text": "Is the deploy green?",
//!     "timestamp": "2023-11-14T22:13:20.123456+00:00",
//!     "sub-messages": [
//!       { "name": "Bob", "text": "yes", "timestamp": "2023-11-14T22:14:02+00:00" }
//!     ]
//!   }
//! ]
//! ```
//!
//! Writes go to a sibling temp file that is renamed into place, so a failed
//! run never leaves a truncated snapshot behind.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{ConversationSnapshot, DedupKey};

/// Write `snapshot` to `path`, creating parent directories.
pub fn save_snapshot(path: &Path, snapshot: &ConversationSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    write_atomic(path, &json)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

/// Read a snapshot previously written by [`save_snapshot`].
///
/// Both nesting levels are re-sorted on load and an empty `sub-messages`
/// array is dropped, so a hand-edited file still satisfies the ordering
/// and thread-shape guarantees.
pub fn load_snapshot(path: &Path) -> Result<ConversationSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let snapshot: ConversationSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;

    let messages = snapshot
        .into_messages()
        .into_iter()
        .map(|mut msg| {
            let replies = msg.replies.take().unwrap_or_default();
            msg.attach_replies(replies);
            msg
        })
        .collect();
    Ok(ConversationSnapshot::new(messages))
}

/// Load a persisted seen-set; a missing file is an empty set.
pub fn load_seen(path: &Path) -> Result<Vec<DedupKey>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seen-set {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse seen-set {}", path.display()))
}

/// Persist a seen-set as a sorted JSON array of hex keys.
pub fn save_seen<'a, I>(path: &Path, keys: I) -> Result<()>
where
    I: IntoIterator<Item = &'a DedupKey>,
{
    let sorted: BTreeSet<&DedupKey> = keys.into_iter().collect();
    let json = serde_json::to_string_pretty(&sorted)?;
    write_atomic(path, &json)
        .with_context(|| format!("failed to write seen-set {}", path.display()))
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedMessage, MessageTime};
    use chrono::DateTime;

    fn msg(name: &str, text: &str, secs: i64) -> EnrichedMessage {
        EnrichedMessage {
            name: name.to_string(),
            text: text.to_string(),
            timestamp: MessageTime::At(DateTime::from_timestamp(secs, 0).unwrap()),
            replies: None,
        }
    }

    #[test]
    fn snapshot_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("history.json");

        let mut parent = msg("Alice", "question", 100);
        parent.attach_replies(vec![msg("Bob", "answer", 101)]);
        let snapshot = ConversationSnapshot::new(vec![
            parent,
            msg("Carol", "standalone", 50),
            EnrichedMessage {
                timestamp: MessageTime::Invalid,
                ..msg("Dan", "odd", 0)
            },
        ]);

        save_snapshot(&path, &snapshot).unwrap();
        assert!(!dir.path().join("data").join("history.json.tmp").exists());

        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn replies_are_written_under_sub_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut parent = msg("Alice", "question", 100);
        parent.attach_replies(vec![msg("Bob", "answer", 101)]);
        save_snapshot(&path, &ConversationSnapshot::new(vec![parent, msg("C", "x", 1)])).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["name"], "C");
        assert!(raw[0].get("sub-messages").is_none());
        assert_eq!(raw[1]["sub-messages"][0]["text"], "answer");
    }

    #[test]
    fn hand_edited_file_is_normalized_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "A", "text": "q", "timestamp": "2023-11-14T22:13:20.000000+00:00",
                 "sub-messages": [
                    {"name": "B", "text": "late", "timestamp": "2023-11-14T22:20:00.000000+00:00"},
                    {"name": "C", "text": "early", "timestamp": "2023-11-14T22:14:00.000000+00:00"}
                 ]},
                {"name": "D", "text": "solo", "timestamp": "2023-11-14T23:00:00.000000+00:00",
                 "sub-messages": []}
            ]"#,
        )
        .unwrap();

        let loaded = load_snapshot(&path).unwrap();
        assert!(loaded.is_ordered());
        let replies: Vec<_> = loaded.messages()[0].replies().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(replies, vec!["early", "late"]);
        assert!(loaded.messages()[1].replies.is_none());
        assert!(!loaded.messages()[1].is_thread());
    }

    #[test]
    fn out_of_range_source_timestamp_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut far = msg("Eve", "from the far future", 0);
        far.timestamp = crate::enrich::normalize_timestamp(Some("999999999999"));
        let snapshot = ConversationSnapshot::new(vec![msg("Ann", "now", 100), far]);

        save_snapshot(&path, &snapshot).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.messages()[1].timestamp, MessageTime::Invalid);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read snapshot"));
    }

    #[test]
    fn seen_set_persists_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        assert!(load_seen(&path).unwrap().is_empty());

        let b = DedupKey::new("b", &MessageTime::Unknown);
        let a = DedupKey::new("a", &MessageTime::Unknown);
        save_seen(&path, [&b, &a]).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(load_seen(&path).unwrap(), expected);
    }
}
