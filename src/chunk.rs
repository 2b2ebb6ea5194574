//! Paragraph-boundary text chunker.
//!
//! Splits a message body into pieces that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! first; a single oversized paragraph is hard-split at the last newline
//! or space before the limit.

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
///
/// Returns at least one chunk; an input that fits is returned trimmed as a
/// single chunk.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    if text.trim().len() <= max_chars {
        return vec![text.trim().to_string()];
    }

    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut chunks);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }

    chunks
}

/// Split an oversized paragraph at newline/space boundaries.
fn hard_split(paragraph: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let mut actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        if actual_split == 0 {
            // Limit smaller than the first character.
            actual_split = remaining.chars().next().map_or(1, char::len_utf8);
        }
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}
