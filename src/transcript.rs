//! Transcript replay: a recorded conversation served as a virtualized view.
//!
//! A transcript is a JSON file holding the items of a conversation in
//! display order. [`TranscriptSource`] replays it the way a chat client
//! renders it: fixed-height rows, only a window around the viewport is
//! materialized, the view opens at the newest content, and older pages load
//! when the view is scrolled to the top, which shifts the scroll position.
//!
//! ```json
//! {
//!   "title": "Team chat",
//!   "view": { "visible": 800, "item_height": 80, "page_size": 50 },
//!   "items": [
//!     { "kind": "day", "label": "January 10" },
//!     { "kind": "message", "id": "4812", "outgoing": false,
//!       "sender": "Alice", "time": "10:02", "text": "see attached",
//!       "media": { "handle": "p1", "url": "photos/p1.jpg", "cache": "cache/p1.jpg" } },
//!     { "kind": "service", "text": "Bob joined the group" }
//!   ]
//! }
//! ```
//!
//! Relative media `url`s and `cache` paths resolve against the transcript's
//! directory.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};
use crate::extract::{fingerprint, sanitize_text, text_lines, truncate_chars, Extraction, FieldExtractor};
use crate::media::{MediaFailure, MediaHost, RasterOptions};
use crate::models::{MediaAttachment, MediaRef, Record, RecordId, ReplyRef, Role};
use crate::source::{ScrollExtent, ScrollSource};

const REPLY_EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub view: ViewGeometry,
    pub items: Vec<TranscriptItem>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_title() -> String {
    "Chat".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ViewGeometry {
    #[serde(default = "default_visible")]
    pub visible: u64,
    #[serde(default = "default_item_height")]
    pub item_height: u64,
    /// Rows materialized beyond each edge of the viewport.
    #[serde(default = "default_overscan")]
    pub overscan: u64,
    /// Rows loaded per lazy page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ViewGeometry {
    fn default() -> Self {
        Self {
            visible: default_visible(),
            item_height: default_item_height(),
            overscan: default_overscan(),
            page_size: default_page_size(),
        }
    }
}

fn default_visible() -> u64 {
    800
}
fn default_item_height() -> u64 {
    80
}
fn default_overscan() -> u64 {
    2
}
fn default_page_size() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptItem {
    Day {
        label: String,
    },
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        outgoing: Option<bool>,
        #[serde(default)]
        sender: Option<String>,
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        text: String,
        #[serde(default)]
        reply: Option<TranscriptReply>,
        #[serde(default)]
        media: Option<TranscriptMedia>,
    },
    Service {
        #[serde(default)]
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptReply {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptMedia {
    pub handle: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Local copy served over the privileged data channel.
    #[serde(default)]
    pub cache: Option<String>,
    /// Base64 raster already rendered in the view.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl Transcript {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::SourceUnavailable(format!(
                "cannot read transcript {}: {}",
                path.display(),
                e
            ))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::parse(&content, base_dir)
    }

    pub fn parse(content: &str, base_dir: PathBuf) -> Result<Self> {
        let mut transcript: Transcript = serde_json::from_str(content).map_err(|e| {
            ExportError::SourceUnavailable(format!("invalid transcript: {}", e))
        })?;
        transcript.base_dir = base_dir;
        transcript.resolve_urls();
        Ok(transcript)
    }

    fn resolve_urls(&mut self) {
        let base_dir = self.base_dir.clone();
        for item in &mut self.items {
            if let TranscriptItem::Message {
                media: Some(media), ..
            } = item
            {
                if let Some(url) = media.url.as_mut() {
                    if !url.contains("://") && !url.starts_with("data:") {
                        *url = format!("file://{}", base_dir.join(&*url).display());
                    }
                }
            }
        }
    }

    pub fn message_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, TranscriptItem::Message { .. }))
            .count()
    }

    pub fn media_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, TranscriptItem::Message { media: Some(_), .. }))
            .count()
    }
}

// ─── Source ─────────────────────────────────────────────────────────

pub struct TranscriptSource {
    title: String,
    view: ViewGeometry,
    items: Vec<TranscriptItem>,
    /// Index of the oldest loaded item.
    loaded_from: usize,
    position: u64,
}

impl TranscriptSource {
    pub fn new(transcript: &Transcript) -> Self {
        let view = transcript.view;
        let items = transcript.items.clone();
        let loaded_from = items.len().saturating_sub(view.page_size);
        let mut source = Self {
            title: transcript.title.clone(),
            view,
            items,
            loaded_from,
            position: 0,
        };
        // Chat views open at the newest content.
        source.position = source.scroll_extent().max_position();
        source
    }

    pub fn loaded_count(&self) -> usize {
        self.items.len() - self.loaded_from
    }
}

impl ScrollSource for TranscriptSource {
    type Item = TranscriptItem;

    fn probe(&self) -> Result<()> {
        if self.view.visible == 0 || self.view.item_height == 0 {
            return Err(ExportError::SourceUnavailable(
                "transcript view has no visible area".to_string(),
            ));
        }
        Ok(())
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn scroll_extent(&self) -> ScrollExtent {
        ScrollExtent {
            total: self.loaded_count() as u64 * self.view.item_height,
            visible: self.view.visible,
        }
    }

    fn scroll_position(&self) -> u64 {
        self.position
    }

    fn set_scroll_position(&mut self, position: u64) {
        let mut position = position.min(self.scroll_extent().max_position());
        if position == 0 && self.loaded_from > 0 {
            let page = self.view.page_size.max(1).min(self.loaded_from);
            self.loaded_from -= page;
            // Keep the previously visible rows on screen.
            position = page as u64 * self.view.item_height;
        }
        self.position = position;
    }

    fn list_materialized_items(&self) -> Vec<TranscriptItem> {
        let h = self.view.item_height.max(1);
        let first = (self.position / h).saturating_sub(self.view.overscan) as usize;
        let last = ((self.position + self.view.visible).div_ceil(h) + self.view.overscan) as usize;
        let loaded = &self.items[self.loaded_from..];
        let last = last.min(loaded.len());
        if first >= last {
            return Vec::new();
        }
        loaded[first..last].to_vec()
    }
}

// ─── Extractor ──────────────────────────────────────────────────────

/// Field extractor for transcript items.
pub struct TranscriptExtractor;

impl FieldExtractor<TranscriptItem> for TranscriptExtractor {
    fn identify(&self, item: &TranscriptItem) -> RecordId {
        match item {
            TranscriptItem::Message {
                id: Some(id), ..
            } if !id.trim().is_empty() => RecordId::source(id.trim()),
            TranscriptItem::Message {
                sender,
                time,
                text,
                media,
                ..
            } => fingerprint(&[
                sender.as_deref().unwrap_or(""),
                time.as_deref().unwrap_or(""),
                text,
                media.as_ref().map(|m| m.handle.as_str()).unwrap_or(""),
            ]),
            TranscriptItem::Day { label } => fingerprint(&["day", label]),
            TranscriptItem::Service { text } => fingerprint(&["service", text]),
        }
    }

    fn day_marker(&self, item: &TranscriptItem) -> Option<String> {
        match item {
            TranscriptItem::Day { label } => Some(sanitize_text(label).trim().to_string()),
            _ => None,
        }
    }

    fn extract(&self, item: &TranscriptItem, id: RecordId) -> Extraction {
        let TranscriptItem::Message {
            outgoing,
            sender,
            time,
            text,
            reply,
            media,
            ..
        } = item
        else {
            return Extraction::Unextractable("not a message".to_string());
        };

        let lines = text_lines(text);
        if lines.is_empty() && media.is_none() {
            return Extraction::Unextractable("empty message".to_string());
        }

        let role = match outgoing {
            Some(true) => Role::Outgoing,
            Some(false) => Role::Incoming,
            None => Role::Unknown,
        };
        let sender = sender
            .as_deref()
            .map(|s| sanitize_text(s).trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| (role == Role::Outgoing).then(|| "Me".to_string()));

        Extraction::Record(Record {
            id,
            role,
            sender,
            timestamp: time.as_deref().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            day: None,
            text: lines,
            reply: reply.as_ref().map(|r| ReplyRef {
                sender: r.sender.clone(),
                excerpt: r
                    .text
                    .as_deref()
                    .map(|t| truncate_chars(&sanitize_text(t), REPLY_EXCERPT_CHARS)),
                has_media: r.media,
            }),
            media: media.as_ref().map(|m| {
                MediaAttachment::pending(MediaRef {
                    handle: m.handle.clone(),
                    locator: m.url.clone(),
                })
            }),
        })
    }
}

// ─── Media host ─────────────────────────────────────────────────────

/// Serves the `cache` file as the privileged data channel and the inline
/// `thumbnail` as the already-rendered raster.
pub struct TranscriptMediaHost {
    base_dir: PathBuf,
    media: HashMap<String, TranscriptMedia>,
}

impl TranscriptMediaHost {
    pub fn new(transcript: &Transcript) -> Self {
        let media = transcript
            .items
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::Message {
                    media: Some(m), ..
                } => Some((m.handle.clone(), m.clone())),
                _ => None,
            })
            .collect();
        Self {
            base_dir: transcript.base_dir.clone(),
            media,
        }
    }

    fn lookup(&self, media: &MediaRef) -> std::result::Result<&TranscriptMedia, MediaFailure> {
        self.media
            .get(&media.handle)
            .ok_or_else(|| MediaFailure::not_found(format!("no element for {}", media.handle)))
    }
}

#[async_trait]
impl MediaHost for TranscriptMediaHost {
    async fn read_privileged(&self, media: &MediaRef) -> std::result::Result<Vec<u8>, MediaFailure> {
        let entry = self.lookup(media)?;
        let cache = entry
            .cache
            .as_ref()
            .ok_or_else(|| MediaFailure::unavailable("no cached copy"))?;
        tokio::fs::read(self.base_dir.join(cache))
            .await
            .map_err(|e| MediaFailure::from_io(&e))
    }

    async fn snapshot_rendered(
        &self,
        media: &MediaRef,
        _opts: RasterOptions,
    ) -> std::result::Result<Vec<u8>, MediaFailure> {
        let entry = self.lookup(media)?;
        let thumbnail = entry
            .thumbnail
            .as_ref()
            .ok_or_else(|| MediaFailure::not_found("thumbnail not rendered"))?;
        base64::engine::general_purpose::STANDARD
            .decode(thumbnail.trim())
            .map_err(|e| MediaFailure::decode(e.to_string()))
    }
}
