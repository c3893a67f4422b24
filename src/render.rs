//! Chunk rendering and output packaging.
//!
//! Each sealed chunk is rendered into one [`Document`] as soon as it is
//! sealed. Once the session drains, a [`Packager`] turns the documents into
//! the single file the user receives. One document is written as is. Several
//! documents go into a zip archive named after a shared base label, with the
//! 1-based part number in each entry name.
//!
//! | Parts | Output |
//! |-------|--------|
//! | 1 | `{label}.{ext}` |
//! | n > 1 | `{label}_export.zip` holding `{label}_part1.{ext}` … `{label}_part{n}.{ext}` |

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};
use crate::harvest::DateWindow;
use crate::models::{Chunk, MediaAttachment, MediaStatus, Record, Role};

const MAX_FILENAME_CHARS: usize = 50;

/// Document format of rendered chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    #[default]
    Markdown,
}

impl OutputFormat {
    pub fn renderer(self) -> Box<dyn ChunkRenderer> {
        match self {
            OutputFormat::Json => Box::new(JsonRenderer),
            OutputFormat::Markdown => Box::new(MarkdownRenderer),
        }
    }
}

/// Export-wide metadata handed to the renderer with each chunk.
#[derive(Debug, Clone)]
pub struct RenderMeta {
    pub title: String,
    pub exported_at: DateTime<Utc>,
    pub window: Option<DateWindow>,
    /// Known only once the final chunk is sealed.
    pub total: Option<usize>,
}

/// One rendered chunk.
#[derive(Debug, Clone)]
pub struct Document {
    pub index: usize,
    pub extension: &'static str,
    pub content: Vec<u8>,
}

pub trait ChunkRenderer: Send + Sync {
    fn extension(&self) -> &'static str;

    fn render(&self, chunk: &Chunk, meta: &RenderMeta) -> Result<Document>;
}

/// The file handed to the user.
#[derive(Debug, Clone)]
pub struct Package {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub parts: usize,
}

impl Package {
    /// Write into `dir`, creating it if needed. Returns the written path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

pub trait Packager {
    fn package(&self, documents: Vec<Document>, label: &str) -> Result<Package>;
}

// ─── Naming ─────────────────────────────────────────────────────────

/// Replace characters that are unsafe in file names and cap the length.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .take(MAX_FILENAME_CHARS)
        .collect();
    if cleaned.is_empty() {
        "chat".to_string()
    } else {
        cleaned
    }
}

/// Shared base name of every output file.
pub fn base_label(title: &str, window: Option<&DateWindow>) -> String {
    let title = sanitize_filename(title);
    match window {
        Some(w) => format!("{}_{}_to_{}", title, w.from, w.to),
        None => title,
    }
}

fn data_uri(media: &MediaAttachment) -> Option<String> {
    match (media.status(), media.bytes()) {
        (MediaStatus::Acquired { format, .. }, Some(bytes)) => Some(format!(
            "data:{};base64,{}",
            format.mime(),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )),
        _ => None,
    }
}

// ─── JSON ───────────────────────────────────────────────────────────

pub struct JsonRenderer;

#[derive(Serialize)]
struct JsonDocument<'a> {
    title: &'a str,
    exported_at: String,
    part: usize,
    total_parts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    window: Option<JsonWindow>,
    record_count: usize,
    media_count: usize,
    records: Vec<JsonRecord<'a>>,
}

#[derive(Serialize)]
struct JsonWindow {
    from: String,
    to: String,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(flatten)]
    record: &'a Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

impl ChunkRenderer for JsonRenderer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, chunk: &Chunk, meta: &RenderMeta) -> Result<Document> {
        let doc = JsonDocument {
            title: &meta.title,
            exported_at: meta.exported_at.to_rfc3339(),
            part: chunk.index,
            total_parts: meta.total,
            window: meta.window.map(|w| JsonWindow {
                from: w.from.to_string(),
                to: w.to.to_string(),
            }),
            record_count: chunk.len(),
            media_count: chunk.media_count(),
            records: chunk
                .records
                .iter()
                .map(|record| JsonRecord {
                    record,
                    image: record.media.as_ref().and_then(data_uri),
                })
                .collect(),
        };
        Ok(Document {
            index: chunk.index,
            extension: self.extension(),
            content: serde_json::to_vec_pretty(&doc)?,
        })
    }
}

// ─── Markdown ───────────────────────────────────────────────────────

pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn render_record(out: &mut String, record: &Record) -> std::fmt::Result {
        let sender = match (&record.sender, record.role) {
            (Some(s), _) => s.as_str(),
            (None, Role::Outgoing) => "Me",
            (None, _) => "Unknown",
        };
        match &record.timestamp {
            Some(time) => write!(out, "**[{}] {}:**", time, sender)?,
            None => write!(out, "**{}:**", sender)?,
        }
        writeln!(out)?;

        if let Some(reply) = &record.reply {
            let who = reply.sender.as_deref().unwrap_or("Unknown");
            let what = match (&reply.excerpt, reply.has_media) {
                (Some(text), _) => text.as_str(),
                (None, true) => "[image]",
                (None, false) => "…",
            };
            writeln!(out, "> ↪ {}: {}", who, what)?;
            writeln!(out)?;
        }

        for line in &record.text {
            writeln!(out, "{}  ", line)?;
        }

        if let Some(media) = &record.media {
            if !record.text.is_empty() {
                writeln!(out)?;
            }
            match media.status() {
                MediaStatus::Acquired { .. } => {
                    if let Some(uri) = data_uri(media) {
                        writeln!(out, "![image]({})", uri)?;
                    }
                }
                MediaStatus::Failed { reason } => {
                    write!(out, "*[image unavailable: {}]*", reason)?;
                    if let Some(link) = media.fallback_locator() {
                        write!(out, " [original]({})", link)?;
                    }
                    writeln!(out)?;
                }
                MediaStatus::Pending => writeln!(out, "*[image not captured]*")?,
            }
        }
        writeln!(out)
    }
}

impl ChunkRenderer for MarkdownRenderer {
    fn extension(&self) -> &'static str {
        "md"
    }

    fn render(&self, chunk: &Chunk, meta: &RenderMeta) -> Result<Document> {
        let render = || -> std::result::Result<String, std::fmt::Error> {
            let mut out = String::new();
            writeln!(out, "# {}", meta.title)?;
            writeln!(out)?;
            let total = meta
                .total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                out,
                "Exported {} · part {} of {} · {} messages",
                meta.exported_at.format("%Y-%m-%d %H:%M UTC"),
                chunk.index,
                total,
                chunk.len()
            )?;
            if let Some(w) = meta.window {
                writeln!(out, "Date range: {} to {}", w.from, w.to)?;
            }
            writeln!(out)?;
            writeln!(out, "---")?;
            writeln!(out)?;

            let mut day: Option<&str> = None;
            for record in &chunk.records {
                if let Some(d) = record.day.as_deref() {
                    if day != Some(d) {
                        writeln!(out, "### {}", d)?;
                        writeln!(out)?;
                        day = Some(d);
                    }
                }
                Self::render_record(&mut out, record)?;
            }
            Ok(out)
        };

        let text = render().map_err(|e| ExportError::Renderer(e.to_string()))?;
        Ok(Document {
            index: chunk.index,
            extension: self.extension(),
            content: text.into_bytes(),
        })
    }
}

// ─── Zip ────────────────────────────────────────────────────────────

pub struct ZipPackager;

impl Packager for ZipPackager {
    fn package(&self, mut documents: Vec<Document>, label: &str) -> Result<Package> {
        documents.sort_by_key(|d| d.index);
        let parts = documents.len();

        if parts == 0 {
            return Err(ExportError::Renderer("nothing to package".to_string()));
        }
        if parts == 1 {
            let doc = documents.remove(0);
            return Ok(Package {
                filename: format!("{}.{}", label, doc.extension),
                bytes: doc.content,
                parts,
            });
        }

        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for doc in &documents {
            writer.start_file(
                format!("{}_part{}.{}", label, doc.index, doc.extension),
                options,
            )?;
            writer.write_all(&doc.content)?;
        }
        let bytes = writer.finish()?.into_inner();

        Ok(Package {
            filename: format!("{}_export.zip", label),
            bytes,
            parts,
        })
    }
}
