//! Run progress reporting.
//!
//! Reports observable progress during `harvest fetch` and `harvest index`
//! so users see how many pages and messages have been collected, when the
//! source is throttling the run, and how far indexing has got. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::fmt;
use std::io::Write;
use std::time::Duration;

/// Pipeline stage, used to label progress events and fatal errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Paginating the channel history.
    Fetch,
    /// Building the identity directory from the user listing.
    UserDirectory,
    /// Paginating replies for thread parents.
    ReplyPagination,
    /// Handing documents to the index.
    Indexing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::UserDirectory => "user-directory",
            Stage::ReplyPagination => "reply-pagination",
            Stage::Indexing => "indexing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// A page was fetched; `total` is the running record count for the stage.
    Page {
        stage: Stage,
        total: u64,
        next_cursor: Option<String>,
    },
    /// The source asked us to back off before retrying.
    RateLimited {
        stage: Stage,
        wait: Duration,
        attempt: u32,
    },
    /// Replies collected for `n` of `total` thread parents.
    Threads { n: u64, total: u64 },
    /// `n` of `total` top-level messages indexed.
    Indexing { n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the pipeline.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "fetch  1,234 records  cursor=dXNlcj...".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Page {
                stage,
                total,
                next_cursor,
            } => format!(
                "{}  {} records  cursor={}\n",
                stage,
                format_number(*total),
                next_cursor.as_deref().unwrap_or("<end>")
            ),
            ProgressEvent::RateLimited {
                stage,
                wait,
                attempt,
            } => format!(
                "{}  rate limited, sleeping {}ms (attempt {})\n",
                stage,
                wait.as_millis(),
                attempt
            ),
            ProgressEvent::Threads { n, total } => format!(
                "reply-pagination  {} / {} threads\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Indexing { n, total } => format!(
                "indexing  {} / {} messages\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Page {
                stage,
                total,
                next_cursor,
            } => serde_json::json!({
                "event": "progress",
                "stage": stage.as_str(),
                "phase": "page",
                "total": total,
                "next_cursor": next_cursor,
            }),
            ProgressEvent::RateLimited {
                stage,
                wait,
                attempt,
            } => serde_json::json!({
                "event": "progress",
                "stage": stage.as_str(),
                "phase": "rate_limited",
                "wait_ms": wait.as_millis() as u64,
                "attempt": attempt,
            }),
            ProgressEvent::Threads { n, total } => serde_json::json!({
                "event": "progress",
                "stage": Stage::ReplyPagination.as_str(),
                "phase": "threads",
                "n": n,
                "total": total,
            }),
            ProgressEvent::Indexing { n, total } => serde_json::json!({
                "event": "progress",
                "stage": Stage::Indexing.as_str(),
                "phase": "indexing",
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn stage_labels_match_error_vocabulary() {
        assert_eq!(Stage::Fetch.to_string(), "fetch");
        assert_eq!(Stage::UserDirectory.to_string(), "user-directory");
        assert_eq!(Stage::ReplyPagination.to_string(), "reply-pagination");
        assert_eq!(Stage::Indexing.to_string(), "indexing");
    }
}
