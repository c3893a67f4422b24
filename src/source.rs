//! The scrollable content view the harvester drives.
//!
//! A source only materializes a sliding window of its items. The harvester
//! moves that window with [`ScrollSource::set_scroll_position`] and reads
//! whatever is materialized. All calls are synchronous queries or commands
//! against the live view; pacing between them is the harvester's job.

use crate::error::Result;

/// Scroll geometry in source units (typically pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollExtent {
    /// Total scrollable length of currently loaded content.
    pub total: u64,
    /// Length of the visible viewport.
    pub visible: u64,
}

impl ScrollExtent {
    /// Largest position the view can scroll to.
    pub fn max_position(&self) -> u64 {
        self.total.saturating_sub(self.visible)
    }
}

pub trait ScrollSource {
    /// Rendered item handed to the [`FieldExtractor`](crate::extract::FieldExtractor).
    type Item;

    /// Fail with [`ExportError::SourceUnavailable`](crate::error::ExportError)
    /// if the scroll container or item list cannot be located.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable name of the conversation, used as the export label.
    fn title(&self) -> String;

    fn scroll_extent(&self) -> ScrollExtent;

    fn scroll_position(&self) -> u64;

    /// Command the view to scroll. The view may clamp the position or
    /// shift it (e.g. when older content loads above).
    fn set_scroll_position(&mut self, position: u64);

    /// Items currently materialized, in visible order.
    fn list_materialized_items(&self) -> Vec<Self::Item>;
}
