//! Field extraction: turning a rendered item into a [`Record`].
//!
//! Which fragment of an item is the sender, the timestamp, or the text is
//! inherently source-specific, so it lives behind [`FieldExtractor`].
//! Implementations must be pure functions of the item.

use sha2::{Digest, Sha256};

use crate::models::{Record, RecordId};

/// Result of extracting one item.
#[derive(Debug)]
pub enum Extraction {
    Record(Record),
    /// The item could not be structured; it is skipped and not retried.
    Unextractable(String),
}

pub trait FieldExtractor<I> {
    /// Stable identity of `item`, computed without full extraction so that
    /// already-seen items can be skipped cheaply.
    fn identify(&self, item: &I) -> RecordId;

    /// Day label if `item` is a day separator rather than content.
    fn day_marker(&self, _item: &I) -> Option<String> {
        None
    }

    /// Structure `item` into a record carrying `id`.
    fn extract(&self, item: &I, id: RecordId) -> Extraction;
}

/// Content-derived identity for items that expose no source id.
///
/// Identical parts always yield the same fingerprint, so genuinely repeated
/// short messages from the same sender at the same time will collide.
pub fn fingerprint(parts: &[&str]) -> RecordId {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1F]);
    }
    let digest = format!("{:x}", hasher.finalize());
    RecordId::fingerprint(&digest[..16])
}

/// Strip control characters and U+FFFD that break document rendering.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !(c.is_control() || *c == '\u{FFFD}'))
        .collect()
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head.trim_end())
    } else {
        head
    }
}

/// Split text into trimmed, non-empty lines.
pub fn text_lines(text: &str) -> Vec<String> {
    sanitize_text(text)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
